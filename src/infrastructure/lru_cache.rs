//! LRU Cache
//!
//! Byte-budgeted concurrent cache for encoded response values. When an
//! insert would push the stored bytes over the budget, least-recently
//! accessed entries are evicted until it fits. Expiry is not handled here;
//! the caching filter schedules removals on the timer wheel.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

struct CacheEntry {
    value: Bytes,
    last_access_ms: AtomicU64,
}

/// Size-bounded LRU of opaque byte values.
pub struct LruCache {
    entries: DashMap<String, CacheEntry>,
    max_bytes: u64,
    used: AtomicU64,
    /// Serializes evictions so concurrent inserts don't over-evict
    evict_lock: Mutex<()>,
}

impl LruCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            entries: DashMap::new(),
            max_bytes,
            used: AtomicU64::new(0),
            evict_lock: Mutex::new(()),
        }
    }

    fn now_ms() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_millis() as u64
    }

    /// Fetch a value and mark it as recently used.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let entry = self.entries.get(key)?;
        entry
            .last_access_ms
            .store(Self::now_ms(), Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Insert a value, evicting least-recently used entries as needed.
    /// Values larger than the whole budget are not stored.
    pub fn add(&self, key: impl Into<String>, value: Bytes) {
        let key = key.into();
        let size = value.len() as u64;

        if size > self.max_bytes {
            tracing::debug!("cache value for <{}> exceeds budget, skipped", key);
            return;
        }

        let entry = CacheEntry {
            value,
            last_access_ms: AtomicU64::new(Self::now_ms()),
        };

        if let Some(old) = self.entries.insert(key, entry) {
            self.used
                .fetch_sub(old.value.len() as u64, Ordering::Relaxed);
        }
        self.used.fetch_add(size, Ordering::Relaxed);

        while self.used.load(Ordering::Relaxed) > self.max_bytes {
            if !self.evict_oldest() {
                break;
            }
        }
    }

    /// Remove an entry. Safe to call for keys that are already gone.
    pub fn remove(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.used
                .fetch_sub(entry.value.len() as u64, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes_used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    fn evict_oldest(&self) -> bool {
        let _guard = self.evict_lock.lock();

        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.last_access_ms.load(Ordering::Relaxed))
            .map(|e| e.key().clone());

        match oldest {
            Some(key) => {
                self.remove(&key);
                tracing::debug!("cache evicted <{}>", key);
                true
            }
            None => false,
        }
    }
}
