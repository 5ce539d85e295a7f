//! Cross-reference resolution driven by a fake indexer subprocess.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use crader_engine::xref::{roles, FrameWriter, OccurrenceRecord, XrefResolver};
use crader_storage::{
    ChunkContent, ChunkKind, ChunkNode, Connector, FileCategory, FileRecord, ParsingStatus,
    RelationType, Repository, Store,
};

fn occurrence(symbol: &str, file: &str, start: u64, mask: u32) -> OccurrenceRecord {
    OccurrenceRecord {
        symbol: symbol.to_string(),
        file: file.to_string(),
        byte_start: start,
        byte_end: start + 5,
        role_mask: mask,
    }
}

/// Write a shell script that dumps pre-encoded frames to stdout, standing in
/// for the real indexer tool.
fn fake_indexer(dir: &Path, occurrences: &[OccurrenceRecord]) -> String {
    let frames_path = dir.join("frames.bin");
    let mut frames = Vec::new();
    let mut writer = FrameWriter::new(&mut frames);
    // Lead with an unknown tag: the reader must skip it.
    writer.write_frame(42, b"from-the-future").unwrap();
    for occ in occurrences {
        writer.write_occurrence(occ).unwrap();
    }
    std::fs::write(&frames_path, frames).unwrap();

    let script_path = dir.join("fake-indexer.sh");
    std::fs::write(
        &script_path,
        format!("#!/bin/sh\ncat '{}'\n", frames_path.display()),
    )
    .unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
    script_path.display().to_string()
}

async fn seed_nodes(store: &Store, snapshot_id: Uuid, paths: &[&str]) -> Vec<ChunkNode> {
    let mut nodes = Vec::new();
    for path in paths {
        let file = FileRecord {
            id: Uuid::new_v4(),
            snapshot_id,
            path: path.to_string(),
            language: Some("python".to_string()),
            size_bytes: 64,
            category: FileCategory::Source,
            file_hash: blake3::hash(path.as_bytes()).to_hex().to_string(),
            parsing_status: ParsingStatus::Success,
            parsing_error: None,
            indexed_at: Utc::now(),
        };
        store.insert_files(&[file.clone()]).await.unwrap();

        let body = format!("def body_of_{}(): pass", path.replace(['/', '.'], "_"));
        let content = ChunkContent::from_bytes(body.as_bytes());
        let node = ChunkNode {
            id: Uuid::new_v4(),
            snapshot_id,
            file_id: Some(file.id),
            file_path: path.to_string(),
            chunk_hash: content.chunk_hash.clone(),
            kind: ChunkKind::Function,
            start_line: 1,
            end_line: 1,
            byte_start: 0,
            byte_end: 64,
            is_external: false,
            metadata: serde_json::json!({}),
        };
        store.insert_chunk_nodes(&[node.clone()]).await.unwrap();
        store.insert_chunk_contents(&[content]).await.unwrap();
        nodes.push(node);
    }
    nodes
}

#[tokio::test]
async fn test_resolver_pairs_references_with_definitions() {
    let dir = TempDir::new().unwrap();
    let worktree = dir.path().join("tree");
    std::fs::create_dir_all(&worktree).unwrap();
    std::fs::write(worktree.join("pyproject.toml"), b"[project]\n").unwrap();

    let store = Store::new(Connector::in_memory().await.unwrap());
    let repo = Repository::new(Uuid::new_v4(), "https://example.com/x.git", "x", "main");
    store.ensure_repository(&repo).await.unwrap();
    let (snapshot, _) = store.create_snapshot(repo.id, "c1", "main").await.unwrap();

    let nodes = seed_nodes(&store, snapshot.id, &["a.py", "b.py"]).await;

    let command = fake_indexer(
        dir.path(),
        &[
            // helper defined in a.py, called from b.py.
            occurrence("pkg.helper", "a.py", 2, roles::DEFINES),
            occurrence("pkg.helper", "b.py", 8, roles::REFERENCES),
            // an import-site read of the same definition.
            occurrence("pkg.helper", "b.py", 20, roles::READS_FROM),
            // external library call: no definition in the tree.
            occurrence("requests.get", "b.py", 30, 0),
        ],
    );

    let resolver = XrefResolver::new(command, Duration::from_secs(10));
    let report = resolver.resolve(&store, snapshot.id, &worktree).await.unwrap();

    assert_eq!(report.projects_indexed, 1);
    assert_eq!(report.projects_failed, 0);
    assert_eq!(report.edges_created, 3);
    assert_eq!(report.external_targets, 1);

    // b.py's node calls a.py's node.
    let outgoing = store.get_outgoing_calls(nodes[1].id).await.unwrap();
    assert!(outgoing.iter().any(|n| n.node.id == nodes[0].id));

    // The external sentinel landed as a flagged node.
    let external = outgoing
        .iter()
        .find(|n| n.node.is_external)
        .expect("external sentinel edge");
    assert_eq!(external.symbol.as_deref(), Some("requests.get"));
    assert_eq!(external.node.kind, ChunkKind::External);

    // reads_from got its own relation type.
    let incoming = store.get_incoming_references(nodes[0].id).await.unwrap();
    assert!(incoming.iter().any(|n| n.relation == RelationType::ReadsFrom));

    // No dangling endpoints anywhere.
    assert_eq!(store.dangling_edges(snapshot.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_resolver_records_tool_failure_and_continues() {
    let dir = TempDir::new().unwrap();
    let worktree = dir.path().join("tree");
    std::fs::create_dir_all(&worktree).unwrap();
    std::fs::write(worktree.join("pyproject.toml"), b"[project]\n").unwrap();

    let script = dir.path().join("broken.sh");
    std::fs::write(&script, "#!/bin/sh\nexit 3\n").unwrap();
    let mut perms = std::fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).unwrap();

    let store = Store::new(Connector::in_memory().await.unwrap());
    let repo = Repository::new(Uuid::new_v4(), "https://example.com/y.git", "y", "main");
    store.ensure_repository(&repo).await.unwrap();
    let (snapshot, _) = store.create_snapshot(repo.id, "c1", "main").await.unwrap();

    let resolver = XrefResolver::new(script.display().to_string(), Duration::from_secs(10));
    let report = resolver.resolve(&store, snapshot.id, &worktree).await.unwrap();

    // Failure is recorded per project root, not raised.
    assert_eq!(report.projects_failed, 1);
    assert_eq!(report.edges_created, 0);
    assert_eq!(report.failures.len(), 1);
}
