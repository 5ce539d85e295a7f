//! Tree-sitter driven chunk extraction.
//!
//! The walk is top-down: entering a chunk-producing construct emits a chunk.
//! Containers (classes, impl blocks) are split around their nested
//! definitions so the emitted chunks form a flat, non-overlapping partition
//! of the decoded text; the bytes between semantic constructs are emitted as
//! `filler` chunks. Error nodes never abort a parse; the chunks they touch
//! are tagged instead.

use tracing::debug;
use tree_sitter::{Node, Parser};

use crate::languages::{self, LanguageSpec};
use crate::scan;
use crate::types::{
    ChunkKind, FileCategory, FileOutcome, LocalRelation, ParseStatus, RelationKind, SourceChunk,
};

/// Default size cap. Files above it are skipped, not parsed.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub max_file_size: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

pub struct ChunkParser {
    config: ParserConfig,
}

#[derive(Debug, Clone)]
struct Span {
    start: usize,
    end: usize,
}

#[derive(Debug, Clone)]
struct Definition {
    span: Span,
    kind: ChunkKind,
    symbol: Option<String>,
}

impl Default for ChunkParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl ChunkParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parse one file's raw bytes into its outcome. Never panics and never
    /// returns an error: every failure mode lands in the outcome's status.
    pub fn parse_file(&self, path: &str, bytes: &[u8]) -> FileOutcome {
        let file_hash = blake3::hash(bytes).to_hex().to_string();
        let size_bytes = bytes.len() as u64;
        let spec = languages::for_path(path);
        let category = scan::categorize(path, spec.is_some());

        if size_bytes > self.config.max_file_size {
            return FileOutcome::skipped(
                path,
                category,
                size_bytes,
                file_hash,
                format!(
                    "file too large: {} bytes exceeds cap of {}",
                    size_bytes, self.config.max_file_size
                ),
            );
        }
        if scan::is_binary(bytes) {
            return FileOutcome::skipped(path, category, size_bytes, file_hash, "Binary file");
        }

        let (decoded, lossy) = scan::decode_lossy(bytes);
        if lossy {
            debug!(path, "decoded with lossy fallback");
        }
        let text = decoded.into_owned();

        let mut outcome = FileOutcome {
            path: path.to_string(),
            language: spec.map(|s| s.name.to_string()),
            category,
            size_bytes,
            file_hash,
            status: ParseStatus::Success,
            error: None,
            text: text.clone().into_bytes(),
            chunks: Vec::new(),
            relations: Vec::new(),
        };

        if text.is_empty() {
            return outcome;
        }

        let Some(spec) = spec else {
            // No grammar: one whole-file chunk keeps the bytes addressable.
            outcome.chunks = vec![whole_file_chunk(&text, ChunkKind::Module)];
            return outcome;
        };

        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&spec.language()) {
            outcome.status = ParseStatus::Error;
            outcome.error = Some(format!("grammar rejected: {}", e));
            outcome.chunks = vec![whole_file_chunk(&text, ChunkKind::Module)];
            return outcome;
        }

        let Some(tree) = parser.parse(&text, None) else {
            outcome.status = ParseStatus::Error;
            outcome.error = Some("tree-sitter returned no tree".to_string());
            outcome.chunks = vec![whole_file_chunk(&text, ChunkKind::Module)];
            return outcome;
        };

        let root = tree.root_node();
        let mut error_spans = Vec::new();
        collect_error_spans(root, &mut error_spans);

        let mut leaves = Vec::new();
        let mut containers = Vec::new();
        collect_definitions(root, spec, &text, false, &mut leaves, &mut containers);
        leaves.sort_by_key(|d| d.span.start);

        let lines = LineIndex::new(&text);
        outcome.chunks = build_partition(&text, &leaves, &containers, &error_spans, &lines);
        outcome.relations = build_relations(root, spec, &text, &outcome.chunks, &containers);
        outcome
    }
}

fn whole_file_chunk(text: &str, kind: ChunkKind) -> SourceChunk {
    let lines = LineIndex::new(text);
    SourceChunk {
        kind,
        byte_start: 0,
        byte_end: text.len(),
        start_line: 1,
        end_line: lines.line_of(text.len().saturating_sub(1)),
        symbol: None,
        has_parse_errors: false,
    }
}

/// Byte offsets of line starts, for offset → 1-indexed line lookups.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&s| s <= offset)
    }
}

fn collect_error_spans(node: Node, out: &mut Vec<Span>) {
    if node.is_error() || node.is_missing() {
        out.push(Span {
            start: node.start_byte(),
            end: node.end_byte().max(node.start_byte() + 1),
        });
        return;
    }
    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_error_spans(child, out);
    }
}

/// True when any strict descendant opens a chunk.
fn has_chunk_descendant(node: Node, spec: &LanguageSpec) -> bool {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if spec.produces(child.kind()).is_some() {
            return true;
        }
        if has_chunk_descendant(child, spec) {
            return true;
        }
    }
    false
}

fn symbol_of(node: Node, text: &str) -> Option<String> {
    node.child_by_field_name("name")
        .and_then(|n| text.get(n.byte_range()))
        .map(String::from)
}

/// Top-down scan. Chunk-producing nodes become leaves unless they are
/// containers with nested definitions, in which case the scan recurses and
/// the container's own bytes are emitted later as split pieces.
fn collect_definitions(
    node: Node,
    spec: &LanguageSpec,
    text: &str,
    in_class: bool,
    leaves: &mut Vec<Definition>,
    containers: &mut Vec<Definition>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match spec.produces(child.kind()) {
            Some(kind) => {
                let symbol = symbol_of(child, text);
                let span = Span {
                    start: child.start_byte(),
                    end: child.end_byte(),
                };
                if spec.is_container(child.kind()) && has_chunk_descendant(child, spec) {
                    containers.push(Definition {
                        span,
                        kind,
                        symbol: symbol.clone(),
                    });
                    let inside_class = in_class || kind == ChunkKind::Class;
                    collect_definitions(child, spec, text, inside_class, leaves, containers);
                } else {
                    let kind = if in_class && kind == ChunkKind::Function {
                        ChunkKind::Method
                    } else {
                        kind
                    };
                    leaves.push(Definition { span, kind, symbol });
                }
            }
            None => {
                collect_definitions(child, spec, text, in_class, leaves, containers);
            }
        }
    }
}

/// Assemble the flat partition: leaves as-is, the bytes in between owned by
/// their innermost container (split pieces keep the container's kind and
/// symbol) or emitted as filler.
fn build_partition(
    text: &str,
    leaves: &[Definition],
    containers: &[Definition],
    error_spans: &[Span],
    lines: &LineIndex,
) -> Vec<SourceChunk> {
    let len = text.len();
    let mut boundaries: Vec<usize> = vec![0, len];
    for leaf in leaves {
        boundaries.push(leaf.span.start);
        boundaries.push(leaf.span.end);
    }
    for c in containers {
        boundaries.push(c.span.start);
        boundaries.push(c.span.end);
    }
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut chunks = Vec::new();
    for window in boundaries.windows(2) {
        let (start, end) = (window[0], window[1]);
        if start >= end {
            continue;
        }
        // A leaf wholly owns its interval.
        let owner = leaves
            .iter()
            .find(|l| l.span.start <= start && l.span.end >= end)
            .or_else(|| {
                // Otherwise the innermost container covering it.
                containers
                    .iter()
                    .filter(|c| c.span.start <= start && c.span.end >= end)
                    .min_by_key(|c| c.span.end - c.span.start)
            });

        let (kind, symbol) = match owner {
            Some(def) => (def.kind, def.symbol.clone()),
            None => (ChunkKind::Filler, None),
        };

        chunks.push(SourceChunk {
            kind,
            byte_start: start,
            byte_end: end,
            start_line: lines.line_of(start),
            end_line: lines.line_of(end - 1),
            symbol,
            has_parse_errors: error_spans
                .iter()
                .any(|e| e.start < end && e.end > start),
        });
    }
    chunks
}

/// Intra-file relations: `defines` from a container's first split piece to
/// the definitions inside it, and `calls` from call sites to same-file
/// targets known by name.
fn build_relations(
    root: Node,
    spec: &LanguageSpec,
    text: &str,
    chunks: &[SourceChunk],
    containers: &[Definition],
) -> Vec<LocalRelation> {
    let mut relations = Vec::new();

    // defines: a container's header piece -> each definition inside it.
    for (target_idx, target) in chunks.iter().enumerate() {
        if !matches!(
            target.kind,
            ChunkKind::Method | ChunkKind::Function | ChunkKind::Class
        ) {
            continue;
        }
        let Some(container) = containers
            .iter()
            .filter(|c| c.span.start <= target.byte_start && c.span.end >= target.byte_end)
            .min_by_key(|c| c.span.end - c.span.start)
        else {
            continue;
        };
        // The header piece starts exactly where the container does.
        let Some(parent_idx) = chunks
            .iter()
            .position(|p| p.byte_start == container.span.start)
        else {
            continue;
        };
        if parent_idx == target_idx {
            continue;
        }
        relations.push(LocalRelation {
            source: parent_idx,
            target: target_idx,
            kind: RelationKind::Defines,
            symbol: target.symbol.clone(),
        });
    }

    // calls: same-file resolution by declared name.
    let mut symbols: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for (idx, chunk) in chunks.iter().enumerate() {
        if let Some(symbol) = chunk.symbol.as_deref() {
            symbols.entry(symbol).or_insert(idx);
        }
    }

    let mut call_sites = Vec::new();
    collect_call_sites(root, spec, text, &mut call_sites);
    for (offset, callee) in call_sites {
        let Some(&target) = symbols.get(callee.as_str()) else {
            continue;
        };
        let Some(source) = chunk_index_at(chunks, offset) else {
            continue;
        };
        if source == target {
            continue;
        }
        let relation = LocalRelation {
            source,
            target,
            kind: RelationKind::Calls,
            symbol: Some(callee),
        };
        if !relations.contains(&relation) {
            relations.push(relation);
        }
    }

    relations
}

fn collect_call_sites(
    node: Node,
    spec: &LanguageSpec,
    text: &str,
    out: &mut Vec<(usize, String)>,
) {
    if node.kind() == spec.call_kind {
        if let Some(name) = callee_name(node, text) {
            out.push((node.start_byte(), name));
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_call_sites(child, spec, text, out);
    }
}

/// Last path segment of the callee expression: `a.b.c(...)` → `c`.
fn callee_name(node: Node, text: &str) -> Option<String> {
    let target = node
        .child_by_field_name("function")
        .or_else(|| node.child_by_field_name("name"))?;
    let raw = text.get(target.byte_range())?;
    let name = raw
        .rsplit(|c: char| c == '.' || c == ':')
        .next()?
        .trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(name.to_string())
}

fn chunk_index_at(chunks: &[SourceChunk], offset: usize) -> Option<usize> {
    chunks
        .iter()
        .position(|c| c.byte_start <= offset && offset < c.byte_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, source: &str) -> FileOutcome {
        ChunkParser::default().parse_file(path, source.as_bytes())
    }

    fn reconstruct(outcome: &FileOutcome) -> Vec<u8> {
        let mut sorted: Vec<&SourceChunk> = outcome.chunks.iter().collect();
        sorted.sort_by_key(|c| c.byte_start);
        sorted
            .iter()
            .flat_map(|c| outcome.chunk_bytes(c).to_vec())
            .collect()
    }

    #[test]
    fn test_python_functions_become_chunks() {
        let source = "import os\n\ndef alpha():\n    return 1\n\ndef beta():\n    return 2\n";
        let outcome = parse("mod.py", source);

        assert_eq!(outcome.status, ParseStatus::Success);
        let functions: Vec<_> = outcome
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Function)
            .collect();
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].symbol.as_deref(), Some("alpha"));
        assert_eq!(functions[1].symbol.as_deref(), Some("beta"));

        // The import line lives in a filler chunk.
        assert!(outcome.chunks.iter().any(|c| c.kind == ChunkKind::Filler));
    }

    #[test]
    fn test_reconstruction_is_byte_exact() {
        let source = "import os\n\n\nclass Greeter:\n    def hello(self):\n        return 'hi'\n\n    def bye(self):\n        return 'bye'\n\n\ndef main():\n    Greeter().hello()\n";
        let outcome = parse("app.py", source);
        assert_eq!(reconstruct(&outcome), source.as_bytes());

        // No overlaps, no gaps.
        let mut cursor = 0;
        let mut sorted: Vec<_> = outcome.chunks.iter().collect();
        sorted.sort_by_key(|c| c.byte_start);
        for chunk in sorted {
            assert_eq!(chunk.byte_start, cursor);
            cursor = chunk.byte_end;
        }
        assert_eq!(cursor, source.len());
    }

    #[test]
    fn test_class_splits_into_header_and_methods() {
        let source = "class Greeter:\n    \"\"\"docs\"\"\"\n\n    def hello(self):\n        return 'hi'\n";
        let outcome = parse("g.py", source);

        let methods: Vec<_> = outcome
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Method)
            .collect();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].symbol.as_deref(), Some("hello"));

        let class_pieces: Vec<_> = outcome
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Class)
            .collect();
        assert!(!class_pieces.is_empty());
        assert_eq!(class_pieces[0].symbol.as_deref(), Some("Greeter"));

        // The class header defines its method.
        assert!(outcome
            .relations
            .iter()
            .any(|r| r.kind == RelationKind::Defines));
    }

    #[test]
    fn test_same_file_call_relation() {
        let source = "def callee():\n    return 1\n\ndef caller():\n    return callee()\n";
        let outcome = parse("c.py", source);

        let call = outcome
            .relations
            .iter()
            .find(|r| r.kind == RelationKind::Calls)
            .expect("calls relation");
        assert_eq!(outcome.chunks[call.source].symbol.as_deref(), Some("caller"));
        assert_eq!(outcome.chunks[call.target].symbol.as_deref(), Some("callee"));
        assert_eq!(call.symbol.as_deref(), Some("callee"));
    }

    #[test]
    fn test_broken_syntax_is_tolerated_and_tagged() {
        let source = "def good():\n    return 1\n\ndef broken(:\n    nonsense((\n";
        let outcome = parse("b.py", source);

        assert_eq!(outcome.status, ParseStatus::Success);
        assert!(outcome.chunks.iter().any(|c| c.has_parse_errors));
        assert!(outcome.chunks.iter().any(|c| !c.has_parse_errors));
        assert_eq!(reconstruct(&outcome), source.as_bytes());
    }

    #[test]
    fn test_binary_file_is_skipped() {
        let outcome = ChunkParser::default().parse_file("fake.py", &[0x00, 0x01, 0x02]);
        assert_eq!(outcome.status, ParseStatus::Skipped);
        assert!(outcome.error.as_deref().unwrap().contains("Binary"));
        assert!(outcome.chunks.is_empty());
    }

    #[test]
    fn test_oversized_file_is_skipped() {
        let parser = ChunkParser::new(ParserConfig { max_file_size: 16 });
        let outcome = parser.parse_file("heavy.js", &[b'x'; 32]);
        assert_eq!(outcome.status, ParseStatus::Skipped);
        assert!(outcome.error.as_deref().unwrap().contains("too large"));
    }

    #[test]
    fn test_lossy_decode_never_raises() {
        let mut bytes = b"def ok():\n    pass\n# ".to_vec();
        bytes.push(0xff);
        bytes.push(b'\n');
        let outcome = ChunkParser::default().parse_file("enc.py", &bytes);
        assert_eq!(outcome.status, ParseStatus::Success);
        assert!(!outcome.chunks.is_empty());
    }

    #[test]
    fn test_unknown_language_gets_whole_file_chunk() {
        let source = "SELECT * FROM users;\n";
        let outcome = parse("query.xql", source);
        assert_eq!(outcome.status, ParseStatus::Success);
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].kind, ChunkKind::Module);
        assert_eq!(reconstruct(&outcome), source.as_bytes());
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        let outcome = parse("empty.py", "");
        assert_eq!(outcome.status, ParseStatus::Success);
        assert!(outcome.chunks.is_empty());
    }

    #[test]
    fn test_rust_items_chunk() {
        let source = "struct Point { x: i32 }\n\nimpl Point {\n    fn norm(&self) -> i32 { self.x }\n}\n\nfn main() { }\n";
        let outcome = parse("lib.rs", source);
        assert_eq!(reconstruct(&outcome), source.as_bytes());
        assert!(outcome
            .chunks
            .iter()
            .any(|c| c.kind == ChunkKind::Method && c.symbol.as_deref() == Some("norm")));
        assert!(outcome
            .chunks
            .iter()
            .any(|c| c.symbol.as_deref() == Some("Point")));
    }

    #[test]
    fn test_typescript_class_and_function() {
        let source = "export function load(): void {}\n\nclass Store {\n  get(): number { return 1 }\n}\n";
        let outcome = parse("store.ts", source);
        assert_eq!(reconstruct(&outcome), source.as_bytes());
        assert!(outcome
            .chunks
            .iter()
            .any(|c| c.kind == ChunkKind::Function && c.symbol.as_deref() == Some("load")));
        assert!(outcome
            .chunks
            .iter()
            .any(|c| c.kind == ChunkKind::Method && c.symbol.as_deref() == Some("get")));
    }
}
