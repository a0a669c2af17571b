//! Read-through query cache for the projection query boundary.
//!
//! Projections are eventually consistent, so a stale page within the TTL is
//! acceptable by construction; invalidation is TTL-only. Keys are derived
//! from `(route, normalized query)` so the same logical query hits the same
//! entry regardless of parameter order. Cache writes are best-effort and
//! never block correctness: on any doubt, fall through to the store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A cached query result with its bookkeeping stamps.
#[derive(Clone, Debug)]
struct CachedPage {
    value: serde_json::Value,
    cached_at: Instant,
    last_accessed: Instant,
}

impl CachedPage {
    fn new(value: serde_json::Value) -> Self {
        let now = Instant::now();
        Self {
            value,
            cached_at: now,
            last_accessed: now,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Cache statistics, for observability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that found nothing (or only an expired entry).
    pub misses: u64,
    /// Entries evicted to make room or because they expired.
    pub evictions: u64,
}

/// TTL + LRU cache for serialized query pages.
///
/// Interior-mutable so one instance can sit behind an `Arc` next to the
/// query handlers.
#[derive(Debug)]
pub struct QueryCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CachedPage>,
    stats: CacheStats,
}

impl QueryCache {
    /// Create a cache bounded to `capacity` entries with the given TTL.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Build the cache key for a route and its query parameters. Parameters
    /// are sorted so equivalent queries share an entry.
    #[must_use]
    pub fn key(route: &str, params: &[(&str, String)]) -> String {
        let mut sorted: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        sorted.sort();
        format!("{route}?{}", sorted.join("&"))
    }

    /// Look up a live entry.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let Ok(mut inner) = self.inner.lock() else {
            // A poisoned cache is a cache miss, never an error.
            return None;
        };

        match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                entry.last_accessed = Instant::now();
                let value = entry.value.clone();
                inner.stats.hits += 1;
                Some(value)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.stats.misses += 1;
                inner.stats.evictions += 1;
                None
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Insert a result, evicting expired entries first and the
    /// least-recently-used entry when at capacity.
    pub fn insert(&self, key: String, value: serde_json::Value) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        let ttl = self.ttl;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(ttl));
        inner.stats.evictions += (before - inner.entries.len()) as u64;

        if inner.entries.len() >= self.capacity {
            if let Some(lru_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(key, _)| key.clone())
            {
                inner.entries.remove(&lru_key);
                inner.stats.evictions += 1;
            }
        }

        inner.entries.insert(key, CachedPage::new(value));
    }

    /// Drop every entry (used by tests and operational tooling; normal
    /// operation relies on TTL expiry alone).
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
        }
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().map(|inner| inner.stats).unwrap_or_default()
    }

    /// Number of live entries (expired ones may still be counted until the
    /// next insert sweeps them).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
