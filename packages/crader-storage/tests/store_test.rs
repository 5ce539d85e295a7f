//! Integration tests against the embedded connector.

use chrono::Utc;
use uuid::Uuid;

use crader_storage::{
    ChunkContent, ChunkKind, ChunkNode, Connector, Edge, EmbeddingRow, FileCategory, FileRecord,
    ParsingStatus, RelationType, Repository, SearchDoc, SearchFilters, SnapshotState,
    StagedEmbedding, Store, Vector,
};

async fn store() -> Store {
    Store::new(Connector::in_memory().await.unwrap())
}

fn repo(name: &str) -> Repository {
    Repository::new(
        Uuid::new_v4(),
        format!("https://example.com/{}.git", name),
        name,
        "main",
    )
}

fn file_record(snapshot_id: Uuid, path: &str) -> FileRecord {
    FileRecord {
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
    }
}

fn node_with_content(
    snapshot_id: Uuid,
    file: &FileRecord,
    byte_start: i64,
    content: &[u8],
) -> (ChunkNode, ChunkContent) {
    let chunk_content = ChunkContent::from_bytes(content);
    let node = ChunkNode {
        id: Uuid::new_v4(),
        snapshot_id,
        file_id: Some(file.id),
        file_path: file.path.clone(),
        chunk_hash: chunk_content.chunk_hash.clone(),
        kind: ChunkKind::Function,
        start_line: 1,
        end_line: 2,
        byte_start,
        byte_end: byte_start + content.len() as i64,
        is_external: false,
        metadata: serde_json::json!({}),
    };
    (node, chunk_content)
}

#[tokio::test]
async fn test_ensure_repository_is_idempotent() {
    let store = store().await;
    let r = repo("alpha");

    let id1 = store.ensure_repository(&r).await.unwrap();
    let id2 = store.ensure_repository(&r).await.unwrap();
    assert_eq!(id1, id2);

    let loaded = store.get_repository(id1).await.unwrap().unwrap();
    assert_eq!(loaded.name, "alpha");
}

#[tokio::test]
async fn test_create_snapshot_short_circuits_on_live_row() {
    let store = store().await;
    let r = repo("alpha");
    store.ensure_repository(&r).await.unwrap();

    let (snap, is_new) = store.create_snapshot(r.id, "c1", "main").await.unwrap();
    assert!(is_new);
    assert_eq!(snap.state, SnapshotState::Pending);

    store
        .activate_snapshot(r.id, snap.id, &serde_json::json!({}))
        .await
        .unwrap();

    let (again, is_new) = store.create_snapshot(r.id, "c1", "main").await.unwrap();
    assert!(!is_new);
    assert_eq!(again.id, snap.id);
    assert_eq!(again.state, SnapshotState::Active);
}

#[tokio::test]
async fn test_create_snapshot_reuses_failed_row() {
    let store = store().await;
    let r = repo("alpha");
    store.ensure_repository(&r).await.unwrap();

    let (snap, _) = store.create_snapshot(r.id, "c1", "main").await.unwrap();
    store.fail_snapshot(snap.id, "worker crash").await.unwrap();

    let (reused, is_new) = store.create_snapshot(r.id, "c1", "main").await.unwrap();
    assert!(is_new);
    assert_eq!(reused.id, snap.id);
    assert_eq!(reused.state, SnapshotState::Pending);
    assert!(reused.error.is_none());
}

#[tokio::test]
async fn test_activation_demotes_previous_active() {
    let store = store().await;
    let r = repo("alpha");
    store.ensure_repository(&r).await.unwrap();

    let (s1, _) = store.create_snapshot(r.id, "c1", "main").await.unwrap();
    store
        .activate_snapshot(r.id, s1.id, &serde_json::json!({}))
        .await
        .unwrap();

    let (s2, _) = store.create_snapshot(r.id, "c2", "main").await.unwrap();
    store
        .activate_snapshot(r.id, s2.id, &serde_json::json!({"files": 3}))
        .await
        .unwrap();

    let active = store.get_active_snapshot(r.id, "main").await.unwrap().unwrap();
    assert_eq!(active.id, s2.id);

    let demoted = store.get_snapshot(s1.id).await.unwrap().unwrap();
    assert_eq!(demoted.state, SnapshotState::Ready);

    // At most one active per (repo, branch).
    let all = store.list_snapshots(r.id).await.unwrap();
    let actives = all
        .iter()
        .filter(|s| s.branch == "main" && s.state == SnapshotState::Active)
        .count();
    assert_eq!(actives, 1);
}

#[tokio::test]
async fn test_activation_is_per_branch() {
    let store = store().await;
    let r = repo("alpha");
    store.ensure_repository(&r).await.unwrap();

    let (main_snap, _) = store.create_snapshot(r.id, "c1", "main").await.unwrap();
    let (feat_snap, _) = store.create_snapshot(r.id, "c2", "feature").await.unwrap();

    store
        .activate_snapshot(r.id, main_snap.id, &serde_json::json!({}))
        .await
        .unwrap();
    store
        .activate_snapshot(r.id, feat_snap.id, &serde_json::json!({}))
        .await
        .unwrap();

    // Both branches keep their own active snapshot.
    assert_eq!(
        store.get_active_snapshot(r.id, "main").await.unwrap().unwrap().id,
        main_snap.id
    );
    assert_eq!(
        store
            .get_active_snapshot(r.id, "feature")
            .await
            .unwrap()
            .unwrap()
            .id,
        feat_snap.id
    );
}

#[tokio::test]
async fn test_content_dedup_across_snapshots() {
    let store = store().await;
    let r = repo("alpha");
    store.ensure_repository(&r).await.unwrap();

    let (s1, _) = store.create_snapshot(r.id, "c1", "main").await.unwrap();
    let (s2, _) = store.create_snapshot(r.id, "c2", "main").await.unwrap();

    let f1 = file_record(s1.id, "a.py");
    let f2 = file_record(s2.id, "a.py");
    store.insert_files(&[f1.clone(), f2.clone()]).await.unwrap();

    let body = b"def shared():\n    return 1\n";
    let (n1, c1) = node_with_content(s1.id, &f1, 0, body);
    let (n2, c2) = node_with_content(s2.id, &f2, 0, body);
    assert_eq!(c1.chunk_hash, c2.chunk_hash);

    store.insert_chunk_nodes(&[n1, n2]).await.unwrap();
    store.insert_chunk_contents(&[c1.clone(), c2]).await.unwrap();

    assert_eq!(store.count_chunk_contents(&c1.chunk_hash).await.unwrap(), 1);
}

#[tokio::test]
async fn test_edges_drop_self_loops_and_stay_connected() {
    let store = store().await;
    let r = repo("alpha");
    store.ensure_repository(&r).await.unwrap();
    let (snap, _) = store.create_snapshot(r.id, "c1", "main").await.unwrap();

    let file = file_record(snap.id, "a.py");
    store.insert_files(&[file.clone()]).await.unwrap();

    let (caller, cc1) = node_with_content(snap.id, &file, 0, b"def caller(): callee()\n");
    let (callee, cc2) = node_with_content(snap.id, &file, 23, b"def callee(): pass\n");
    store
        .insert_chunk_nodes(&[caller.clone(), callee.clone()])
        .await
        .unwrap();
    store.insert_chunk_contents(&[cc1, cc2]).await.unwrap();

    let inserted = store
        .insert_edges(&[
            Edge::new(caller.id, callee.id, RelationType::Calls),
            Edge::new(caller.id, caller.id, RelationType::Calls),
        ])
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let outgoing = store.get_outgoing_calls(caller.id).await.unwrap();
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].node.id, callee.id);

    let incoming = store.get_incoming_references(callee.id).await.unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].node.id, caller.id);

    assert_eq!(store.dangling_edges(snap.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_fts_search_is_snapshot_scoped() {
    let store = store().await;
    let ra = repo("repo-a");
    let rb = repo("repo-b");
    store.ensure_repository(&ra).await.unwrap();
    store.ensure_repository(&rb).await.unwrap();

    let (sa, _) = store.create_snapshot(ra.id, "c1", "main").await.unwrap();
    let (sb, _) = store.create_snapshot(rb.id, "c1", "main").await.unwrap();

    for (snap, marker) in [(sa.id, "process_A_transaction"), (sb.id, "process_B_transaction")] {
        let file = file_record(snap, "worker.py");
        store.insert_files(&[file.clone()]).await.unwrap();
        let body = format!("def {}():\n    pass\n", marker);
        let (node, content) = node_with_content(snap, &file, 0, body.as_bytes());
        store.insert_chunk_nodes(&[node.clone()]).await.unwrap();
        store.insert_chunk_contents(&[content]).await.unwrap();
        store
            .insert_search_docs(&[SearchDoc {
                node_id: node.id,
                file_path: file.path.clone(),
                tags: marker.to_string(),
                content: body,
            }])
            .await
            .unwrap();
    }

    let filters = SearchFilters::default();
    let hits = store
        .search_fts("process_A_transaction", 10, sa.id, &filters)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    let cross = store
        .search_fts("process_B_transaction", 10, sa.id, &filters)
        .await
        .unwrap();
    assert!(cross.is_empty());
}

#[tokio::test]
async fn test_vector_search_ranks_by_cosine() {
    let store = store().await;
    let r = repo("alpha");
    store.ensure_repository(&r).await.unwrap();
    let (snap, _) = store.create_snapshot(r.id, "c1", "main").await.unwrap();

    let file = file_record(snap.id, "a.py");
    store.insert_files(&[file.clone()]).await.unwrap();

    let (near, c1) = node_with_content(snap.id, &file, 0, b"near\n");
    let (far, c2) = node_with_content(snap.id, &file, 5, b"far\n");
    store
        .insert_chunk_nodes(&[near.clone(), far.clone()])
        .await
        .unwrap();
    store.insert_chunk_contents(&[c1, c2]).await.unwrap();

    store
        .save_embeddings_direct(&[
            EmbeddingRow {
                node_id: near.id,
                snapshot_id: snap.id,
                vector_hash: "h-near".to_string(),
                model: "test-model".to_string(),
                vector: vec![1.0, 0.0],
            },
            EmbeddingRow {
                node_id: far.id,
                snapshot_id: snap.id,
                vector_hash: "h-far".to_string(),
                model: "test-model".to_string(),
                vector: vec![0.0, 1.0],
            },
        ])
        .await
        .unwrap();

    let hits = store
        .search_vectors(
            &Vector(vec![1.0, 0.1]),
            10,
            snap.id,
            &SearchFilters::default(),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].node_id, near.id);
    assert!(hits[0].score > hits[1].score);
}

#[tokio::test]
async fn test_staging_backfill_recovers_vectors_from_history() {
    let store = store().await;
    let r = repo("alpha");
    store.ensure_repository(&r).await.unwrap();

    let (old, _) = store.create_snapshot(r.id, "c1", "main").await.unwrap();
    let (new, _) = store.create_snapshot(r.id, "c2", "main").await.unwrap();

    let old_node = Uuid::new_v4();
    let new_node = Uuid::new_v4();

    // A vector embedded under the old snapshot.
    store
        .save_embeddings_direct(&[EmbeddingRow {
            node_id: old_node,
            snapshot_id: old.id,
            vector_hash: "vh-1".to_string(),
            model: "test-model".to_string(),
            vector: vec![0.5, 0.5],
        }])
        .await
        .unwrap();

    // Same content staged under the new snapshot.
    store.prepare_embedding_staging(new.id).await.unwrap();
    store
        .load_staging_data(&[
            StagedEmbedding {
                snapshot_id: new.id,
                node_id: new_node,
                vector_hash: "vh-1".to_string(),
                model: "test-model".to_string(),
                text: "shared text".to_string(),
            },
            StagedEmbedding {
                snapshot_id: new.id,
                node_id: Uuid::new_v4(),
                vector_hash: "vh-unseen".to_string(),
                model: "test-model".to_string(),
                text: "fresh text".to_string(),
            },
        ])
        .await
        .unwrap();

    let recovered = store.backfill_staging_vectors(new.id).await.unwrap();
    assert_eq!(recovered, 1);

    let flushed = store.flush_staged_hits(new.id).await.unwrap();
    assert_eq!(flushed, 1);

    // Only the unseen hash is left to embed.
    let delta = store.fetch_staging_delta(new.id, 100).await.unwrap();
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].vector_hash, "vh-unseen");

    store.cleanup_staging(new.id).await.unwrap();
    assert_eq!(store.count_staged(new.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_prune_keeps_other_branch_intact() {
    let store = store().await;
    let r = repo("alpha");
    store.ensure_repository(&r).await.unwrap();

    let (sa, _) = store.create_snapshot(r.id, "c1", "a").await.unwrap();
    let (sb, _) = store.create_snapshot(r.id, "c2", "b").await.unwrap();

    for snap in [&sa, &sb] {
        let file = file_record(snap.id, "x.py");
        store.insert_files(&[file.clone()]).await.unwrap();
        let (node, content) = node_with_content(snap.id, &file, 0, b"def x(): pass\n");
        store.insert_chunk_nodes(&[node]).await.unwrap();
        store.insert_chunk_contents(&[content]).await.unwrap();
    }

    store.prune_snapshot(sa.id).await.unwrap();

    assert_eq!(store.count_nodes(sa.id).await.unwrap(), 0);
    assert_eq!(store.count_nodes(sb.id).await.unwrap(), 1);
    assert!(store.list_files(sb.id).await.unwrap().len() == 1);

    let pruned = store.get_snapshot(sa.id).await.unwrap().unwrap();
    assert_eq!(pruned.state, SnapshotState::Pruned);
}

#[tokio::test]
async fn test_neighbor_navigation() {
    let store = store().await;
    let r = repo("alpha");
    store.ensure_repository(&r).await.unwrap();
    let (snap, _) = store.create_snapshot(r.id, "c1", "main").await.unwrap();

    let file = file_record(snap.id, "a.py");
    store.insert_files(&[file.clone()]).await.unwrap();

    let (first, c1) = node_with_content(snap.id, &file, 0, b"def a(): pass\n");
    let (second, c2) = node_with_content(snap.id, &file, 14, b"def b(): pass\n");
    store
        .insert_chunk_nodes(&[first.clone(), second.clone()])
        .await
        .unwrap();
    store.insert_chunk_contents(&[c1, c2]).await.unwrap();

    use crader_storage::NeighborDirection;
    let next = store
        .get_neighbor_chunk(first.id, NeighborDirection::Next)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id, second.id);

    let prev = store
        .get_neighbor_chunk(second.id, NeighborDirection::Prev)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(prev.id, first.id);

    assert!(store
        .get_neighbor_chunk(first.id, NeighborDirection::Prev)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_file_chunks_reconstruct_in_byte_order() {
    let store = store().await;
    let r = repo("alpha");
    store.ensure_repository(&r).await.unwrap();
    let (snap, _) = store.create_snapshot(r.id, "c1", "main").await.unwrap();

    let file = file_record(snap.id, "a.py");
    store.insert_files(&[file.clone()]).await.unwrap();

    let original = b"import os\n\ndef main():\n    pass\n";
    let (head, ch) = node_with_content(snap.id, &file, 0, &original[..11]);
    let (tail, ct) = node_with_content(snap.id, &file, 11, &original[11..]);

    // Insert out of order; byte order must still come back.
    store.insert_chunk_nodes(&[tail, head]).await.unwrap();
    store.insert_chunk_contents(&[ct, ch]).await.unwrap();

    let chunks = store.get_file_chunks(snap.id, "a.py").await.unwrap();
    let rebuilt: Vec<u8> = chunks.iter().flat_map(|(_, c)| c.clone()).collect();
    assert_eq!(rebuilt, original);
}
