//! Project root discovery for the cross-reference indexer.
//!
//! A project root is a directory carrying a language's project marker. Roots
//! nested under another root of the same language are folded into the outer
//! one, since the indexer is invoked once per root.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::collector;

const MARKERS: &[(&str, &str)] = &[
    ("pyproject.toml", "python"),
    ("setup.py", "python"),
    ("package.json", "typescript"),
    ("go.mod", "go"),
    ("Cargo.toml", "rust"),
    ("pom.xml", "java"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    /// Worktree-relative directory.
    pub path: PathBuf,
    pub language: String,
}

/// Scan the worktree for project markers.
pub fn scan_project_roots(worktree: &Path) -> Vec<ProjectRoot> {
    let mut roots: Vec<ProjectRoot> = Vec::new();

    for entry in WalkDir::new(worktree)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !e.file_type().is_dir()
                || e.path()
                    .strip_prefix(worktree)
                    .map(|rel| !collector::is_blocklisted(rel))
                    .unwrap_or(true)
        })
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let Some((_, language)) = MARKERS.iter().find(|(marker, _)| *marker == name) else {
            continue;
        };
        let rel_dir = entry
            .path()
            .parent()
            .and_then(|p| p.strip_prefix(worktree).ok())
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();

        roots.push(ProjectRoot {
            path: rel_dir,
            language: language.to_string(),
        });
    }

    // Fold roots nested inside a same-language ancestor.
    roots.sort_by_key(|r| r.path.components().count());
    let mut kept: Vec<ProjectRoot> = Vec::new();
    for root in roots {
        let nested = kept
            .iter()
            .any(|k| k.language == root.language && root.path.starts_with(&k.path));
        if !nested {
            kept.push(root);
        }
    }
    kept
}
