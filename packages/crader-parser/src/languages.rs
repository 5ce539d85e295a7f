//! Language registry: grammar lookup and per-language chunking rules.

use tree_sitter::Language;

use crate::types::ChunkKind;

/// Chunking rules for one grammar.
#[derive(Clone)]
pub struct LanguageSpec {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    /// Node kinds that open a chunk, with the chunk kind they produce.
    pub chunk_kinds: &'static [(&'static str, ChunkKind)],
    /// Node kinds that enclose methods (chunking recurses into these).
    pub container_kinds: &'static [&'static str],
    /// Call-site node kind for same-file `calls` relations.
    pub call_kind: &'static str,
    language: fn() -> Language,
}

impl LanguageSpec {
    pub fn language(&self) -> Language {
        (self.language)()
    }

    pub fn produces(&self, node_kind: &str) -> Option<ChunkKind> {
        self.chunk_kinds
            .iter()
            .find(|(k, _)| *k == node_kind)
            .map(|(_, kind)| *kind)
    }

    pub fn is_container(&self, node_kind: &str) -> bool {
        self.container_kinds.contains(&node_kind)
    }
}

static PYTHON: LanguageSpec = LanguageSpec {
    name: "python",
    extensions: &["py", "pyi"],
    chunk_kinds: &[
        ("function_definition", ChunkKind::Function),
        ("class_definition", ChunkKind::Class),
    ],
    container_kinds: &["class_definition"],
    call_kind: "call",
    language: tree_sitter_python::language,
};

static TYPESCRIPT: LanguageSpec = LanguageSpec {
    name: "typescript",
    extensions: &["ts", "mts", "cts"],
    chunk_kinds: &[
        ("function_declaration", ChunkKind::Function),
        ("generator_function_declaration", ChunkKind::Function),
        ("method_definition", ChunkKind::Method),
        ("class_declaration", ChunkKind::Class),
        ("abstract_class_declaration", ChunkKind::Class),
        ("interface_declaration", ChunkKind::Class),
        ("enum_declaration", ChunkKind::Class),
    ],
    container_kinds: &["class_declaration", "abstract_class_declaration"],
    call_kind: "call_expression",
    language: tree_sitter_typescript::language_typescript,
};

static TSX: LanguageSpec = LanguageSpec {
    name: "typescript",
    extensions: &["tsx", "jsx"],
    chunk_kinds: &[
        ("function_declaration", ChunkKind::Function),
        ("generator_function_declaration", ChunkKind::Function),
        ("method_definition", ChunkKind::Method),
        ("class_declaration", ChunkKind::Class),
        ("abstract_class_declaration", ChunkKind::Class),
        ("interface_declaration", ChunkKind::Class),
        ("enum_declaration", ChunkKind::Class),
    ],
    container_kinds: &["class_declaration", "abstract_class_declaration"],
    call_kind: "call_expression",
    language: tree_sitter_typescript::language_tsx,
};

// JavaScript parses fine under the TSX grammar; one fewer grammar to carry.
static JAVASCRIPT: LanguageSpec = LanguageSpec {
    name: "javascript",
    extensions: &["js", "mjs", "cjs"],
    chunk_kinds: &[
        ("function_declaration", ChunkKind::Function),
        ("generator_function_declaration", ChunkKind::Function),
        ("method_definition", ChunkKind::Method),
        ("class_declaration", ChunkKind::Class),
    ],
    container_kinds: &["class_declaration"],
    call_kind: "call_expression",
    language: tree_sitter_typescript::language_tsx,
};

static RUST: LanguageSpec = LanguageSpec {
    name: "rust",
    extensions: &["rs"],
    chunk_kinds: &[
        ("function_item", ChunkKind::Function),
        ("struct_item", ChunkKind::Class),
        ("enum_item", ChunkKind::Class),
        ("trait_item", ChunkKind::Class),
        ("impl_item", ChunkKind::Class),
        ("mod_item", ChunkKind::Module),
    ],
    container_kinds: &["impl_item", "trait_item", "mod_item"],
    call_kind: "call_expression",
    language: tree_sitter_rust::language,
};

static GO: LanguageSpec = LanguageSpec {
    name: "go",
    extensions: &["go"],
    chunk_kinds: &[
        ("function_declaration", ChunkKind::Function),
        ("method_declaration", ChunkKind::Method),
        ("type_declaration", ChunkKind::Class),
    ],
    container_kinds: &[],
    call_kind: "call_expression",
    language: tree_sitter_go::language,
};

static JAVA: LanguageSpec = LanguageSpec {
    name: "java",
    extensions: &["java"],
    chunk_kinds: &[
        ("method_declaration", ChunkKind::Method),
        ("constructor_declaration", ChunkKind::Method),
        ("class_declaration", ChunkKind::Class),
        ("interface_declaration", ChunkKind::Class),
        ("enum_declaration", ChunkKind::Class),
    ],
    container_kinds: &["class_declaration", "interface_declaration", "enum_declaration"],
    call_kind: "method_invocation",
    language: tree_sitter_java::language,
};

static ALL: &[&LanguageSpec] = &[&PYTHON, &TYPESCRIPT, &TSX, &JAVASCRIPT, &RUST, &GO, &JAVA];

/// Look up the language spec for a file extension.
pub fn for_extension(ext: &str) -> Option<&'static LanguageSpec> {
    let ext = ext.to_ascii_lowercase();
    ALL.iter()
        .find(|spec| spec.extensions.contains(&ext.as_str()))
        .copied()
}

/// Look up by path, using its extension.
pub fn for_path(path: &str) -> Option<&'static LanguageSpec> {
    let ext = std::path::Path::new(path).extension()?.to_str()?;
    for_extension(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_dispatch() {
        assert_eq!(for_extension("py").unwrap().name, "python");
        assert_eq!(for_extension("RS").unwrap().name, "rust");
        assert_eq!(for_extension("tsx").unwrap().name, "typescript");
        assert_eq!(for_extension("js").unwrap().name, "javascript");
        assert!(for_extension("zig").is_none());
    }

    #[test]
    fn test_path_dispatch() {
        assert_eq!(for_path("src/main.go").unwrap().name, "go");
        assert!(for_path("README").is_none());
        assert!(for_path("Makefile").is_none());
    }

    #[test]
    fn test_all_grammars_load() {
        for spec in ALL {
            // Each grammar must be linkable and ABI-compatible.
            let mut parser = tree_sitter::Parser::new();
            parser.set_language(&spec.language()).unwrap();
        }
    }
}
