//! LRU-bounded, single-flight shared cache of loaded [`GenomeIndex`] handles.
//!
//! Structurally identical to [`crate::methylome_set::MethylomeSet`]; kept as
//! a separate type rather than a generic cache because the two differ in
//! default capacity and in what "loading" means (mmap vs. decompress).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::error::StorageError;
use crate::genome_index::GenomeIndex;
use crate::lru_tracker::LruTracker;

/// Default cap on resident genome indexes (§4.3): indexes are smaller and
/// shared across far more requests than methylomes, so the default is wider.
pub const DEFAULT_MAX_LIVE_INDEXES: u32 = 1024;

enum Slot {
    Ready(Arc<GenomeIndex>),
    Pending(Arc<Notify>),
}

struct Inner {
    lru: LruTracker<String>,
    map: HashMap<String, Slot>,
}

/// Mapping from genome assembly name to a shared, cached [`GenomeIndex`]
/// handle, bounded to `max_live_indexes` resident entries.
pub struct GenomeIndexSet {
    index_dir: PathBuf,
    max_live_indexes: u32,
    inner: RwLock<Inner>,
}

impl GenomeIndexSet {
    #[must_use]
    pub fn new(index_dir: impl Into<PathBuf>, max_live_indexes: u32) -> Self {
        Self {
            index_dir: index_dir.into(),
            max_live_indexes,
            inner: RwLock::new(Inner {
                lru: LruTracker::new(max_live_indexes as usize),
                map: HashMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn with_default_capacity(index_dir: impl Into<PathBuf>) -> Self {
        Self::new(index_dir, DEFAULT_MAX_LIVE_INDEXES)
    }

    pub async fn get(&self, assembly: &str) -> Result<Arc<GenomeIndex>, StorageError> {
        loop {
            let notify = {
                let mut guard = self.inner.write().await;
                match guard.map.get(assembly) {
                    Some(Slot::Ready(handle)) => {
                        guard.lru.move_to_front(&assembly.to_string());
                        return Ok(Arc::clone(handle));
                    }
                    Some(Slot::Pending(notify)) => Some(Arc::clone(notify)),
                    None => {
                        guard.map.insert(
                            assembly.to_string(),
                            Slot::Pending(Arc::new(Notify::new())),
                        );
                        None
                    }
                }
            };

            if let Some(notify) = notify {
                notify.notified().await;
                continue;
            }

            let path = self.index_dir.clone();
            let assembly_owned = assembly.to_string();
            let result = tokio::task::spawn_blocking(move || GenomeIndex::read(&path, &assembly_owned))
                .await
                .map_err(|_| StorageError::Io(std::io::Error::other("genome index load task panicked")))?;

            let mut guard = self.inner.write().await;
            let notify = match guard.map.remove(assembly) {
                Some(Slot::Pending(notify)) => notify,
                _ => Arc::new(Notify::new()),
            };

            match result {
                Ok(index) => {
                    let handle = Arc::new(index);
                    if guard.lru.full() && !guard.lru.contains(&assembly.to_string()) {
                        if let Some(evicted) = guard.lru.back().cloned() {
                            guard.lru.pop();
                            guard.map.remove(&evicted);
                        }
                    }
                    guard.lru.push(assembly.to_string());
                    guard
                        .map
                        .insert(assembly.to_string(), Slot::Ready(Arc::clone(&handle)));
                    notify.notify_waiters();
                    return Ok(handle);
                }
                Err(e) => {
                    notify.notify_waiters();
                    return Err(e);
                }
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.lru.len()
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.max_live_indexes
    }

    /// Resolve a genome index by its `index_hash` rather than its assembly
    /// name, since a request (§4.4.1) carries only the hash. Checks resident
    /// entries first, then falls back to scanning `index_dir`'s metadata
    /// sidecars for the assembly whose `index_hash` matches, and loads it
    /// through the ordinary name-keyed path (so the result still benefits
    /// from the single-flight/LRU machinery above).
    pub async fn get_by_hash(&self, hash: u64) -> Result<Arc<GenomeIndex>, StorageError> {
        {
            let guard = self.inner.read().await;
            for slot in guard.map.values() {
                if let Slot::Ready(index) = slot {
                    if index.hash == hash {
                        return Ok(Arc::clone(index));
                    }
                }
            }
        }

        let dir = self.index_dir.clone();
        let assembly = tokio::task::spawn_blocking(move || find_assembly_for_hash(&dir, hash))
            .await
            .map_err(|_| StorageError::Io(std::io::Error::other("index scan task panicked")))??;

        self.get(&assembly).await
    }
}

/// Scan `dir` for `*.cpg_idx.json` metadata sidecars and return the assembly
/// name of the one whose `index_hash` equals `hash`, without loading the
/// (potentially large) binary position data of any candidate that doesn't
/// match.
fn find_assembly_for_hash(dir: &Path, hash: u64) -> Result<String, StorageError> {
    let entries = std::fs::read_dir(dir)?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        let Some(assembly) = file_name.strip_suffix(".cpg_idx.json") else {
            continue;
        };
        let bytes = std::fs::read(&path)?;
        let Ok(meta) = serde_json::from_slice::<crate::genome_index::GenomeIndexMetadata>(&bytes) else {
            continue;
        };
        if meta.index_hash == hash {
            return Ok(assembly.to_string());
        }
    }
    Err(StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no genome index with hash {hash:#x} found in {}", dir.display()),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_toy_index(dir: &std::path::Path, name: &str) {
        let index = GenomeIndex::new(
            name,
            vec!["chr1".to_string(), "chr2".to_string()],
            vec![1000, 2000],
            vec![vec![10, 50, 900], vec![5, 600]],
        );
        index.write(dir, name).unwrap();
    }

    #[tokio::test]
    async fn test_get_loads_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        write_toy_index(dir.path(), "hg38");

        let set = GenomeIndexSet::new(dir.path(), 2);
        let a = set.get("hg38").await.unwrap();
        let b = set.get("hg38").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(set.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_index_errors() {
        let dir = tempfile::tempdir().unwrap();
        let set = GenomeIndexSet::new(dir.path(), 2);
        assert!(set.get("nonexistent").await.is_err());
        assert_eq!(set.len().await, 0);
    }

    #[tokio::test]
    async fn test_eviction_under_capacity_pressure() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            write_toy_index(dir.path(), name);
        }
        let set = GenomeIndexSet::new(dir.path(), 2);
        set.get("a").await.unwrap();
        set.get("b").await.unwrap();
        set.get("c").await.unwrap();
        assert_eq!(set.len().await, 2);
    }

    #[tokio::test]
    async fn test_get_by_hash_resolves_assembly_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_toy_index(dir.path(), "hg38");
        write_toy_index(dir.path(), "mm10");

        let hash = GenomeIndex::read(dir.path(), "mm10").unwrap().hash;

        let set = GenomeIndexSet::new(dir.path(), 4);
        let by_hash = set.get_by_hash(hash).await.unwrap();
        assert_eq!(by_hash.hash, hash);
    }

    #[tokio::test]
    async fn test_get_by_hash_hits_resident_cache_without_rescanning() {
        let dir = tempfile::tempdir().unwrap();
        write_toy_index(dir.path(), "hg38");
        let set = GenomeIndexSet::new(dir.path(), 4);
        let first = set.get("hg38").await.unwrap();

        // Remove the on-disk files; a resident-cache hit shouldn't need them.
        std::fs::remove_file(dir.path().join("hg38.cpg_idx")).unwrap();
        std::fs::remove_file(dir.path().join("hg38.cpg_idx.json")).unwrap();

        let by_hash = set.get_by_hash(first.hash).await.unwrap();
        assert!(Arc::ptr_eq(&first, &by_hash));
    }

    #[tokio::test]
    async fn test_get_by_hash_unknown_hash_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_toy_index(dir.path(), "hg38");
        let set = GenomeIndexSet::new(dir.path(), 4);
        assert!(set.get_by_hash(0xdead_beef).await.is_err());
    }
}
