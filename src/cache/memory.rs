use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{CacheError, PersistentKey, PersistentStore, ProgramDigest};
use crate::binary::{self, ShaderBinary};
use crate::runtime::task::CompilerMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub code_bytes: usize,
    pub persistent: bool,
}

/// Process-wide store of compiled artifacts keyed by [`ProgramDigest`].
///
/// The table lock is never held across persistent-layer I/O.
pub struct BinaryCache {
    entries: RwLock<AHashMap<ProgramDigest, Arc<ShaderBinary>>>,
    persistent: Option<Arc<dyn PersistentStore>>,
    generator_id: String,
    metrics: Arc<CompilerMetrics>,
}

impl BinaryCache {
    pub fn new(generator_id: impl Into<String>, metrics: Arc<CompilerMetrics>) -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
            persistent: None,
            generator_id: generator_id.into(),
            metrics,
        }
    }

    pub fn with_persistent(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.persistent = Some(store);
        self
    }

    pub fn has_persistent(&self) -> bool {
        self.persistent.is_some()
    }

    pub fn generator_id(&self) -> &str {
        &self.generator_id
    }

    pub fn persistent_key(&self, digest: &ProgramDigest) -> PersistentKey {
        PersistentKey::new(digest, &self.generator_id)
    }

    /// Find an artifact, promoting it from the persistent layer on a
    /// memory miss. Corrupt persistent entries are evicted and reported as
    /// a miss.
    pub fn lookup(&self, digest: &ProgramDigest) -> Option<Arc<ShaderBinary>> {
        if let Some(hit) = self.entries.read().get(digest) {
            self.metrics.record_cache_hit(false);
            debug!(%digest, "binary cache hit");
            return Some(Arc::clone(hit));
        }

        let promoted = self.load_persistent(digest);
        match &promoted {
            Some(_) => {
                self.metrics.record_cache_hit(true);
                debug!(%digest, "binary cache hit (persistent)");
            }
            None => {
                self.metrics.record_cache_miss();
                debug!(%digest, "binary cache miss");
            }
        }
        promoted
    }

    fn load_persistent(&self, digest: &ProgramDigest) -> Option<Arc<ShaderBinary>> {
        let store = self.persistent.as_ref()?;
        let key = self.persistent_key(digest);

        let data = match store.get(&key) {
            Ok(data) => data?,
            Err(err) => {
                warn!(%key, "persistent cache read failed: {err}");
                return None;
            }
        };

        match binary::decode(&data) {
            Ok(binary) => {
                let mut entries = self.entries.write();
                let entry = entries.entry(*digest).or_insert_with(|| Arc::new(binary));
                Some(Arc::clone(entry))
            }
            Err(err) => {
                warn!(%key, "evicting corrupt persistent cache entry: {err}");
                if let Err(remove_err) = store.remove(&key) {
                    warn!(%key, "failed to evict corrupt entry: {remove_err}");
                }
                self.metrics.record_corrupt_eviction();
                None
            }
        }
    }

    /// Insert an artifact. An existing entry wins and nothing is persisted.
    ///
    /// Persistent write failures are returned but leave the in-memory
    /// entry in place.
    pub fn insert(
        &self,
        digest: ProgramDigest,
        binary: &Arc<ShaderBinary>,
        persist: bool,
    ) -> Result<InsertOutcome, CacheError> {
        {
            let mut entries = self.entries.write();
            if entries.contains_key(&digest) {
                return Ok(InsertOutcome::AlreadyPresent);
            }
            entries.insert(digest, Arc::clone(binary));
        }

        if persist && let Some(store) = &self.persistent {
            let data = binary::encode(binary)?;
            store.put(&self.persistent_key(&digest), &data)?;
            debug!(%digest, bytes = data.len(), "binary persisted");
        }
        Ok(InsertOutcome::Inserted)
    }

    pub fn contains(&self, digest: &ProgramDigest) -> bool {
        self.entries.read().contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        CacheStats {
            entries: entries.len(),
            code_bytes: entries.values().map(|binary| binary.size()).sum(),
            persistent: self.persistent.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::ShaderConfig;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        entries: Mutex<AHashMap<PersistentKey, Vec<u8>>>,
    }

    impl PersistentStore for MemoryStore {
        fn get(&self, key: &PersistentKey) -> Result<Option<Vec<u8>>, CacheError> {
            Ok(self.entries.lock().get(key).cloned())
        }

        fn put(&self, key: &PersistentKey, data: &[u8]) -> Result<(), CacheError> {
            self.entries.lock().entry(*key).or_insert_with(|| data.to_vec());
            Ok(())
        }

        fn remove(&self, key: &PersistentKey) -> Result<bool, CacheError> {
            Ok(self.entries.lock().remove(key).is_some())
        }
    }

    fn sample() -> Arc<ShaderBinary> {
        let config = ShaderConfig {
            num_vgprs: 24,
            ..ShaderConfig::default()
        };
        Arc::new(ShaderBinary::new(config, Default::default(), vec![1, 2, 3, 4]))
    }

    #[test]
    fn second_insert_reports_already_present() {
        let cache = BinaryCache::new("test", CompilerMetrics::new());
        let digest = ProgramDigest::from_bytes([9; 20]);
        assert_eq!(
            cache.insert(digest, &sample(), false).unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            cache.insert(digest, &sample(), false).unwrap(),
            InsertOutcome::AlreadyPresent
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn persistent_entry_is_promoted() {
        let store = Arc::new(MemoryStore::default());
        let digest = ProgramDigest::from_bytes([1; 20]);

        let writer = BinaryCache::new("gen", CompilerMetrics::new())
            .with_persistent(Arc::clone(&store) as Arc<dyn PersistentStore>);
        writer.insert(digest, &sample(), true).unwrap();

        let metrics = CompilerMetrics::new();
        let reader = BinaryCache::new("gen", Arc::clone(&metrics))
            .with_persistent(Arc::clone(&store) as Arc<dyn PersistentStore>);
        let found = reader.lookup(&digest).expect("promoted from store");
        assert_eq!(found.code, vec![1, 2, 3, 4]);
        assert_eq!(found.config.num_vgprs, 24);
        assert!(reader.contains(&digest));
        assert_eq!(metrics.snapshot().persistent_hits, 1);
    }

    #[test]
    fn corrupt_entry_is_evicted() {
        let store = Arc::new(MemoryStore::default());
        let digest = ProgramDigest::from_bytes([2; 20]);
        let cache = BinaryCache::new("gen", CompilerMetrics::new())
            .with_persistent(Arc::clone(&store) as Arc<dyn PersistentStore>);
        let key = cache.persistent_key(&digest);
        store.put(&key, &[0xde, 0xad, 0xbe, 0xef]).unwrap();

        assert!(cache.lookup(&digest).is_none());
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn other_generator_does_not_see_entry() {
        let store = Arc::new(MemoryStore::default());
        let digest = ProgramDigest::from_bytes([3; 20]);
        BinaryCache::new("gen-1", CompilerMetrics::new())
            .with_persistent(Arc::clone(&store) as Arc<dyn PersistentStore>)
            .insert(digest, &sample(), true)
            .unwrap();

        let other = BinaryCache::new("gen-2", CompilerMetrics::new())
            .with_persistent(Arc::clone(&store) as Arc<dyn PersistentStore>);
        assert!(other.lookup(&digest).is_none());
    }
}
