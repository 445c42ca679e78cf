//! Bounded in-memory embedding cache with TTL.
//!
//! Keyed by a fast non-cryptographic hash of `text || ":" || model_id`.
//! Lookups use `peek` so the underlying LRU order is never promoted, which
//! makes eviction exactly insertion-order (FIFO). Entries older than the
//! TTL report a miss and are dropped on contact.

use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Maximum number of cached vectors.
pub const CACHE_CAPACITY: usize = 10_000;

/// Entries expire 24 hours after insertion.
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

/// Process-lifetime embedding cache. Does not coordinate cross-process.
pub struct EmbeddingCache {
    inner: Mutex<LruCache<u64, CacheEntry>>,
    ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }

    /// Look up a cached vector. Expired entries are removed and miss.
    pub fn get(&self, text: &str, model_id: &str) -> Option<Vec<f32>> {
        let key = cache_key(text, model_id);
        let mut inner = self.inner.lock().expect("embedding cache poisoned");
        match inner.peek(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.vector.clone()),
            Some(_) => {
                inner.pop(&key);
                None
            }
            None => None,
        }
    }

    /// Insert a vector, evicting the oldest entry when full.
    pub fn insert(&self, text: &str, model_id: &str, vector: Vec<f32>) {
        let key = cache_key(text, model_id);
        let mut inner = self.inner.lock().expect("embedding cache poisoned");
        inner.push(
            key,
            CacheEntry {
                vector,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Sweep out all expired entries.
    pub fn purge_expired(&self) {
        let mut inner = self.inner.lock().expect("embedding cache poisoned");
        let expired: Vec<u64> = inner
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() >= self.ttl)
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            inner.pop(&key);
        }
    }

    /// Empty the cache.
    pub fn clear(&self) {
        self.inner.lock().expect("embedding cache poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("embedding cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(CACHE_CAPACITY, CACHE_TTL)
    }
}

fn cache_key(text: &str, model_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    ":".hash(&mut hasher);
    model_id.hash(&mut hasher);
    hasher.finish()
}
