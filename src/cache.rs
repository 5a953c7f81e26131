//! Bounded, expiring memo caches.
//!
//! [`TtlCache`] maps string keys to cloned values with a per-entry TTL and
//! a hard capacity. Eviction is least-recently-used: inserting a new key
//! into a full cache evicts exactly one entry, so the size never exceeds
//! `max_size`. Expiry is checked lazily when an entry is read.
//!
//! Two aliases cover the crate's uses:
//!
//! - [`EmbeddingCache`]: text → embedding vector
//! - [`QueryCache`]: retrieval parameters → ranked hits
//!
//! Values are cloned on the way out, so callers never hold a reference
//! into cached state. Concurrent misses for the same key are not
//! coalesced: both callers compute and the last write wins.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::{RagError, Result};
use crate::models::SearchHit;

/// Stand-in deadline for TTLs too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

pub type EmbeddingCache = TtlCache<Vec<f32>>;
pub type QueryCache = TtlCache<Vec<SearchHit>>;

/// A cached value with its bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct CachedEntry<V> {
    pub key: String,
    pub value: V,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    deadline: Instant,
}

impl<V> CachedEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Counters describing cache behaviour since construction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Hit ratio in `[0.0, 1.0]`; `0.0` before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Inner<V> {
    entries: LruCache<String, CachedEntry<V>>,
    stats: CacheStats,
}

pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    default_ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Result<Self> {
        let capacity = NonZeroUsize::new(max_size)
            .ok_or_else(|| RagError::Validation("cache max_size must be > 0".into()))?;
        Ok(Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats {
                    capacity: max_size,
                    ..CacheStats::default()
                },
            }),
            default_ttl,
        })
    }

    /// Look up `key`. Expired entries are removed and reported as misses.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = Instant::now();

        match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                inner.stats.hits += 1;
                return Some(value);
            }
            Some(_) => {}
            None => {
                inner.stats.misses += 1;
                return None;
            }
        }

        inner.entries.pop(key);
        inner.stats.expirations += 1;
        inner.stats.misses += 1;
        None
    }

    /// Insert or replace `key`, expiring after `ttl`.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) -> Option<String> {
        let key = key.into();
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let started = Instant::now();
        let deadline = started
            .checked_add(ttl)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let entry = CachedEntry {
            key: key.clone(),
            value,
            cached_at: now,
            expires_at,
            deadline,
        };

        let mut inner = self.inner.lock();
        let displaced = inner.entries.push(key.clone(), entry);
        match displaced {
            Some((evicted, _)) if evicted != key => {
                inner.stats.evictions += 1;
                debug!(key = %evicted, "cache eviction");
                Some(evicted)
            }
            _ => None,
        }
    }

    /// Insert with the cache's default TTL.
    pub fn put_default(&self, key: impl Into<String>, value: V) -> Option<String> {
        self.put(key, value, self.default_ttl)
    }

    /// Snapshot of an entry without touching recency or stats.
    pub fn peek_entry(&self, key: &str) -> Option<CachedEntry<V>> {
        self.inner.lock().entries.peek(key).cloned()
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().entries.pop(key).is_some()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        inner.stats.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats.clone()
        }
    }
}

impl EmbeddingCache {
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(config.max_size, config.ttl())
    }
}

impl QueryCache {
    pub fn for_queries(config: &CacheConfig) -> Result<Self> {
        Self::new(config.query_cache_size, config.query_ttl())
    }
}
