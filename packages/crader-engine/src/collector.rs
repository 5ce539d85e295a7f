//! File enumeration for the prepare phase.
//!
//! Tracked files plus untracked-but-unignored working-copy files, via
//! `git ls-files` so gitignore semantics come from git itself. A directory
//! blocklist and symlink rejection are applied on top.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Directories never indexed, wherever they appear in the tree.
pub const BLOCKLIST: &[&str] = &[
    ".git",
    "node_modules",
    "dist",
    "build",
    "out",
    "venv",
    ".venv",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    "target",
    ".idea",
    ".vscode",
    "vendor",
];

pub fn is_blocklisted(rel_path: &Path) -> bool {
    rel_path
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .any(|seg| BLOCKLIST.contains(&seg))
}

/// Enumerate indexable files, repository-relative, sorted.
pub async fn collect_files(worktree: &Path, timeout: Duration) -> Result<Vec<PathBuf>> {
    let tracked = git_ls_files(worktree, &["ls-files", "-z"], timeout).await?;
    let untracked = git_ls_files(
        worktree,
        &["ls-files", "-z", "--others", "--exclude-standard"],
        timeout,
    )
    .await?;

    let mut files: Vec<PathBuf> = tracked
        .into_iter()
        .chain(untracked)
        .filter(|rel| !is_blocklisted(rel))
        .filter(|rel| {
            let full = worktree.join(rel);
            match full.symlink_metadata() {
                Ok(meta) => meta.file_type().is_file(),
                Err(_) => false,
            }
        })
        .collect();

    files.sort();
    files.dedup();
    debug!(count = files.len(), worktree = %worktree.display(), "collected files");
    Ok(files)
}

async fn git_ls_files(
    worktree: &Path,
    args: &[&str],
    timeout: Duration,
) -> Result<Vec<PathBuf>> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(worktree)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| EngineError::Git(format!("git {} timed out", args.join(" "))))??;

    if !output.status.success() {
        return Err(EngineError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(output
        .stdout
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| PathBuf::from(String::from_utf8_lossy(s).into_owned()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocklist_matches_any_segment() {
        assert!(is_blocklisted(Path::new("node_modules/react/index.js")));
        assert!(is_blocklisted(Path::new("app/.git/config")));
        assert!(is_blocklisted(Path::new("pkg/__pycache__/mod.pyc")));
        assert!(!is_blocklisted(Path::new("src/builder.py")));
        assert!(!is_blocklisted(Path::new("distributed/worker.py")));
    }
}
