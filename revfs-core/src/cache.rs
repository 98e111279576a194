//! Read caches
//!
//! Every cache is optional and only ever holds data of committed
//! revisions, so a missing or cold cache never changes what a read returns.

use crate::changes::Change;
use crate::config::{CacheConfig, CacheSettings};
use crate::dir::DirEntries;
use crate::id::{NodeRevId, Revnum};
use crate::noderev::NodeRevision;
use crate::properties::PropertyMap;
use crate::representation::RepHeader;
use crate::svndiff::Window;
use bytes::Bytes;
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Typed key/value cache
pub trait Cache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    fn set(&self, key: K, value: V);

    /// Whether an item of `size` bytes may be stored
    fn is_cachable(&self, _size: u64) -> bool {
        true
    }
}

/// In-process LRU cache
pub struct MemoryCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, V>>,
    max_item_size: Option<u64>,
}

impl<K: Hash + Eq, V> MemoryCache<K, V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_item_size: None,
        }
    }

    /// Refuse items larger than `max` bytes
    pub fn with_max_item_size(mut self, max: u64) -> Self {
        self.max_item_size = Some(max);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<K, V>> {
        // a panic while holding the lock cannot leave a half-written entry
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Cache<K, V> for MemoryCache<K, V>
where
    K: Hash + Eq + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: K, value: V) {
        self.lock().put(key, value);
    }

    fn is_cachable(&self, size: u64) -> bool {
        self.max_item_size.is_none_or(|max| size <= max)
    }
}

/// Header cache key; the same offset means different things packed and unpacked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepHeaderKey {
    pub revision: Revnum,
    pub is_packed: bool,
    pub offset: u64,
}

/// Window cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub revision: Revnum,
    pub offset: u64,
    pub chunk_index: u64,
}

/// Key of a committed representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepKey {
    pub revision: Revnum,
    pub offset: u64,
}

/// A decoded window and the body offset just past it
#[derive(Debug, Clone)]
pub struct CachedWindow {
    pub window: Arc<Window>,
    pub end_offset: u64,
}

pub type SharedCache<K, V> = Option<Arc<dyn Cache<K, V>>>;

/// The caches of one opened store
#[derive(Clone, Default)]
pub struct FsCaches {
    pub rep_header: SharedCache<RepHeaderKey, RepHeader>,
    pub txdelta_window: SharedCache<WindowKey, CachedWindow>,
    pub combined_window: SharedCache<RepKey, Bytes>,
    pub fulltext: SharedCache<RepKey, Bytes>,
    pub node_revision: SharedCache<RepKey, Arc<NodeRevision>>,
    pub dir: SharedCache<RepKey, Arc<DirEntries>>,
    pub properties: SharedCache<RepKey, Arc<PropertyMap>>,
    pub changes: SharedCache<Revnum, Arc<Vec<Change>>>,
    pub rev_root_id: SharedCache<Revnum, NodeRevId>,
    /// Manifest of a packed shard, keyed by shard number
    pub packed_offset: SharedCache<u64, Arc<Vec<u64>>>,
}

fn memory<K, V>(settings: &CacheSettings) -> SharedCache<K, V>
where
    K: Hash + Eq + Send + 'static,
    V: Clone + Send + 'static,
{
    let capacity = NonZeroUsize::new(settings.capacity).filter(|_| settings.enabled)?;
    Some(Arc::new(MemoryCache::new(capacity)))
}

impl FsCaches {
    /// No caching at all
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let fulltext = NonZeroUsize::new(config.fulltext.capacity)
            .filter(|_| config.fulltext.enabled)
            .map(|capacity| {
                Arc::new(MemoryCache::new(capacity).with_max_item_size(config.fulltext_max_item_size))
                    as Arc<dyn Cache<RepKey, Bytes>>
            });

        Self {
            rep_header: memory(&config.rep_header),
            txdelta_window: memory(&config.txdelta_window),
            combined_window: memory(&config.combined_window),
            fulltext,
            node_revision: memory(&config.node_revision),
            dir: memory(&config.dir),
            properties: memory(&config.properties),
            changes: memory(&config.changes),
            rev_root_id: memory(&config.rev_root_id),
            packed_offset: memory(&config.packed_offset),
        }
    }
}

/// Look `key` up in an optional cache.
pub(crate) fn cache_get<K, V>(cache: &SharedCache<K, V>, key: &K) -> Option<V> {
    cache.as_ref()?.get(key)
}

/// Store into an optional cache.
pub(crate) fn cache_set<K, V>(cache: &SharedCache<K, V>, key: K, value: V) {
    if let Some(cache) = cache {
        cache.set(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_cache_evicts_least_recent() {
        let cache: MemoryCache<u64, u64> = MemoryCache::new(NonZeroUsize::new(2).unwrap());
        cache.set(1, 10);
        cache.set(2, 20);
        assert_eq!(cache.get(&1), Some(10));
        cache.set(3, 30);
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_item_size_limit() {
        let cache: MemoryCache<u64, Bytes> =
            MemoryCache::new(NonZeroUsize::new(4).unwrap()).with_max_item_size(10);
        assert!(cache.is_cachable(10));
        assert!(!cache.is_cachable(11));
    }

    #[test]
    fn test_from_config() {
        let caches = FsCaches::from_config(&CacheConfig::default());
        assert!(caches.fulltext.is_some());
        assert!(caches.rep_header.is_some());

        let caches = FsCaches::from_config(&CacheConfig::disabled());
        assert!(caches.fulltext.is_none());
        assert!(caches.dir.is_none());
    }

    #[test]
    fn test_optional_cache_helpers() {
        let none: SharedCache<u64, u64> = None;
        cache_set(&none, 1, 1);
        assert_eq!(cache_get(&none, &1), None);

        let some: SharedCache<u64, u64> = Some(Arc::new(MemoryCache::new(NonZeroUsize::new(1).unwrap())));
        cache_set(&some, 1, 5);
        assert_eq!(cache_get(&some, &1), Some(5));
    }
}
