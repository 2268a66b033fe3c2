//! Bounded concurrent cache with idle-time expiry
//!
//! Recency is the order of an [`LruCache`]: a full cache evicts its least
//! recently read entry in constant time. An entry that has not been read for
//! the configured idle time is dropped on its next lookup.

use std::{
    hash::Hash,
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use log::debug;
use lru::LruCache;
use parking_lot::Mutex;

use crate::config::PropertyCache as PropertyCacheConfig;

struct Slot<V> {
    value: V,
    touched: Instant,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct TtlCache<K, V> {
    entries: Mutex<LruCache<K, Slot<V>>>,
    time_to_idle: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(max_capacity: usize, time_to_idle: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            time_to_idle,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &PropertyCacheConfig) -> Self {
        Self::new(
            config.max_capacity,
            Duration::from_secs(config.time_to_idle),
        )
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let found = {
            let mut entries = self.entries.lock();
            let fresh = entries
                .peek(key)
                .map(|slot| now.duration_since(slot.touched) <= self.time_to_idle);
            match fresh {
                Some(true) => entries.get_mut(key).map(|slot| {
                    slot.touched = now;
                    slot.value.clone()
                }),
                Some(false) => {
                    entries.pop(key);
                    None
                }
                None => None,
            }
        };

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Insert or replace; the last writer wins.
    pub fn insert(&self, key: K, value: V) {
        let slot = Slot {
            value,
            touched: Instant::now(),
        };
        let mut entries = self.entries.lock();
        let evicting = !entries.contains(&key) && entries.len() == entries.cap().get();
        entries.push(key, slot);
        if evicting {
            debug!("Cache full at {} entries, evicted least recently used", entries.len());
        }
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.lock().pop(key);
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
