//! Historical reads against any snapshot.
//!
//! Files are reconstructed from content-addressed chunks; directory
//! listings walk a per-snapshot manifest. Both caches are per-process and
//! bounded.

use std::collections::BTreeMap;
use std::sync::Arc;

use moka::future::Cache;
use uuid::Uuid;

use crader_storage::Store;

use crate::error::{Result, RetrievalError};
use crate::types::DirEntry;

const MANIFEST_CACHE_CAPACITY: u64 = 64;
const CONTENT_CACHE_CAPACITY: u64 = 512;

/// Path → size listing for one snapshot, immutable once built.
#[derive(Debug)]
struct Manifest {
    files: BTreeMap<String, i64>,
}

impl Manifest {
    fn list(&self, dir: &str) -> Vec<DirEntry> {
        let prefix = normalize_dir(dir);
        let mut entries: BTreeMap<String, DirEntry> = BTreeMap::new();

        for (path, size) in &self.files {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child_dir, _)) => {
                    entries
                        .entry(child_dir.to_string())
                        .or_insert_with(|| DirEntry {
                            name: child_dir.to_string(),
                            is_dir: true,
                            size_bytes: None,
                        });
                }
                None if !rest.is_empty() => {
                    entries.insert(
                        rest.to_string(),
                        DirEntry {
                            name: rest.to_string(),
                            is_dir: false,
                            size_bytes: Some(*size),
                        },
                    );
                }
                None => {}
            }
        }
        entries.into_values().collect()
    }
}

fn normalize_dir(dir: &str) -> String {
    let trimmed = dir.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

pub struct SnapshotReader {
    store: Store,
    manifests: Cache<Uuid, Arc<Manifest>>,
    contents: Cache<(Uuid, String), Arc<Vec<u8>>>,
}

impl SnapshotReader {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            manifests: Cache::new(MANIFEST_CACHE_CAPACITY),
            contents: Cache::new(CONTENT_CACHE_CAPACITY),
        }
    }

    /// Reconstruct a file's bytes from its chunks, optionally sliced to a
    /// 1-indexed inclusive line range.
    pub async fn read_file(
        &self,
        snapshot_id: Uuid,
        path: &str,
        start_line: Option<usize>,
        end_line: Option<usize>,
    ) -> Result<String> {
        let bytes = self.file_bytes(snapshot_id, path).await?;
        let text = String::from_utf8_lossy(&bytes);

        match (start_line, end_line) {
            (None, None) => Ok(text.into_owned()),
            (start, end) => {
                let start = start.unwrap_or(1).max(1);
                let lines: Vec<&str> = text.lines().collect();
                let end = end.unwrap_or(lines.len()).min(lines.len());
                if start > end {
                    return Ok(String::new());
                }
                Ok(lines[start - 1..end].join("\n"))
            }
        }
    }

    /// List one directory of the snapshot's manifest.
    pub async fn list_directory(&self, snapshot_id: Uuid, path: &str) -> Result<Vec<DirEntry>> {
        let manifest = self.manifest(snapshot_id).await?;
        let entries = manifest.list(path);
        if entries.is_empty() && !normalize_dir(path).is_empty() {
            // Distinguish an empty listing from a path that never existed.
            let prefix = normalize_dir(path);
            if !manifest.files.keys().any(|p| p.starts_with(&prefix)) {
                return Err(RetrievalError::NotFound(format!(
                    "no such directory in snapshot: {}",
                    path
                )));
            }
        }
        Ok(entries)
    }

    async fn file_bytes(&self, snapshot_id: Uuid, path: &str) -> Result<Arc<Vec<u8>>> {
        let key = (snapshot_id, path.to_string());
        if let Some(hit) = self.contents.get(&key).await {
            return Ok(hit);
        }

        let chunks = self.store.get_file_chunks(snapshot_id, path).await?;
        if chunks.is_empty() {
            // A present-but-empty file still has a files row.
            if self.store.get_file(snapshot_id, path).await?.is_none() {
                return Err(RetrievalError::NotFound(format!(
                    "no such file in snapshot: {}",
                    path
                )));
            }
        }

        let mut bytes = Vec::new();
        for (_, content) in chunks {
            bytes.extend_from_slice(&content);
        }
        let bytes = Arc::new(bytes);
        self.contents.insert(key, bytes.clone()).await;
        Ok(bytes)
    }

    async fn manifest(&self, snapshot_id: Uuid) -> Result<Arc<Manifest>> {
        if let Some(hit) = self.manifests.get(&snapshot_id).await {
            return Ok(hit);
        }
        let files = self
            .store
            .list_files(snapshot_id)
            .await?
            .into_iter()
            .map(|f| (f.path, f.size_bytes))
            .collect();
        let manifest = Arc::new(Manifest { files });
        self.manifests.insert(snapshot_id, manifest.clone()).await;
        Ok(manifest)
    }
}
