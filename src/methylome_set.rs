//! LRU-bounded, single-flight shared cache of loaded [`Methylome`] handles.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::error::StorageError;
use crate::lru_tracker::LruTracker;
use crate::methylome::Methylome;

/// Default cap on resident methylomes, matching the original's
/// `default_max_live_methylomes`.
pub const DEFAULT_MAX_LIVE_METHYLOMES: u32 = 128;

enum Slot {
    Ready(Arc<Methylome>),
    /// Another task is loading this entry; waiters subscribe to `Notify`
    /// and retry once it fires.
    Pending(Arc<Notify>),
}

struct Inner {
    lru: LruTracker<String>,
    map: HashMap<String, Slot>,
}

/// Mapping from methylome name to a shared, cached [`Methylome`] handle,
/// bounded to `max_live_methylomes` resident entries (§4.3).
pub struct MethylomeSet {
    methylome_dir: PathBuf,
    max_live_methylomes: u32,
    inner: RwLock<Inner>,
}

impl MethylomeSet {
    #[must_use]
    pub fn new(methylome_dir: impl Into<PathBuf>, max_live_methylomes: u32) -> Self {
        Self {
            methylome_dir: methylome_dir.into(),
            max_live_methylomes,
            inner: RwLock::new(Inner {
                lru: LruTracker::new(max_live_methylomes as usize),
                map: HashMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn with_default_capacity(methylome_dir: impl Into<PathBuf>) -> Self {
        Self::new(methylome_dir, DEFAULT_MAX_LIVE_METHYLOMES)
    }

    /// §4.3 `get`: move-to-front on hit; single-flight load on miss;
    /// propagate load failures without polluting the cache.
    pub async fn get(&self, name: &str) -> Result<Arc<Methylome>, StorageError> {
        loop {
            let notify = {
                let mut guard = self.inner.write().await;
                match guard.map.get(name) {
                    Some(Slot::Ready(handle)) => {
                        guard.lru.move_to_front(&name.to_string());
                        return Ok(Arc::clone(handle));
                    }
                    Some(Slot::Pending(notify)) => Some(Arc::clone(notify)),
                    None => {
                        guard
                            .map
                            .insert(name.to_string(), Slot::Pending(Arc::new(Notify::new())));
                        None
                    }
                }
            };

            if let Some(notify) = notify {
                notify.notified().await;
                continue; // re-check the map; the loader may have finished or failed
            }

            // We own the pending slot; load outside the lock.
            let path = self.methylome_dir.clone();
            let name_owned = name.to_string();
            let result = tokio::task::spawn_blocking(move || Methylome::read(&path, &name_owned))
                .await
                .map_err(|_| StorageError::Io(std::io::Error::other("methylome load task panicked")))?;

            let mut guard = self.inner.write().await;
            let notify = match guard.map.remove(name) {
                Some(Slot::Pending(notify)) => notify,
                _ => Arc::new(Notify::new()), // defensive; shouldn't happen
            };

            match result {
                Ok(methylome) => {
                    let handle = Arc::new(methylome);
                    if guard.lru.full() && !guard.lru.contains(&name.to_string()) {
                        if let Some(evicted) = guard.lru.back().cloned() {
                            guard.lru.pop();
                            guard.map.remove(&evicted);
                        }
                    }
                    guard.lru.push(name.to_string());
                    guard.map.insert(name.to_string(), Slot::Ready(Arc::clone(&handle)));
                    notify.notify_waiters();
                    return Ok(handle);
                }
                Err(e) => {
                    // do not insert a tombstone; the next caller retries the load
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
        self.max_live_methylomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome_index::GenomeIndex;
    use crate::methylome_data::MethylomeData;

    fn toy_index() -> GenomeIndex {
        GenomeIndex::new("toy", vec!["chr1".to_string()], vec![1000], vec![vec![10, 50]])
    }

    fn write_toy_methylome(dir: &std::path::Path, name: &str, index: &GenomeIndex) {
        let data = MethylomeData::new(vec![(1, 1), (2, 2)]);
        let m = Methylome::build(data, index, false, "t");
        m.write(dir, name).unwrap();
    }

    #[tokio::test]
    async fn test_get_loads_and_caches() {
        let index = toy_index();
        let dir = tempfile::tempdir().unwrap();
        write_toy_methylome(dir.path(), "SRX1", &index);

        let set = MethylomeSet::new(dir.path(), 2);
        let a = set.get("SRX1").await.unwrap();
        let b = set.get("SRX1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(set.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_missing_fails_without_polluting_cache() {
        let dir = tempfile::tempdir().unwrap();
        let set = MethylomeSet::new(dir.path(), 2);
        assert!(set.get("nope").await.is_err());
        assert_eq!(set.len().await, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_after_capacity_exceeded() {
        let index = toy_index();
        let dir = tempfile::tempdir().unwrap();
        for name in ["SRX1", "SRX2", "SRX3"] {
            write_toy_methylome(dir.path(), name, &index);
        }

        let set = MethylomeSet::new(dir.path(), 2);
        set.get("SRX1").await.unwrap();
        set.get("SRX2").await.unwrap();
        set.get("SRX3").await.unwrap(); // evicts SRX1
        assert_eq!(set.len().await, 2);

        let guard = set.inner.read().await;
        assert!(!guard.map.contains_key("SRX1"));
        assert!(guard.map.contains_key("SRX2"));
        assert!(guard.map.contains_key("SRX3"));
    }

    #[tokio::test]
    async fn test_concurrent_get_single_flight() {
        let index = toy_index();
        let dir = tempfile::tempdir().unwrap();
        write_toy_methylome(dir.path(), "SRX1", &index);

        let set = Arc::new(MethylomeSet::new(dir.path(), 4));
        let a = Arc::clone(&set);
        let b = Arc::clone(&set);
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.get("SRX1").await.unwrap() }),
            tokio::spawn(async move { b.get("SRX1").await.unwrap() }),
        );
        assert!(Arc::ptr_eq(&ra.unwrap(), &rb.unwrap()));
    }
}
