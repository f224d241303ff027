//! Query cache contract and the cache-aware skip check.
//!
//! The request cache belongs to the data-fetching layer, not to the
//! prefetcher. This module defines the read interface the prefetcher needs
//! ([`QueryCache`]), the freshness rule ([`should_skip`]), and
//! [`MemoryCache`], an in-process implementation for tests, demos, and apps
//! that have no cache of their own.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Errors a cache backend may report on read.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt cache entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// One cached response, as seen by the prefetcher.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub data: Bytes,
    pub fetched_at: Instant,
    pub stale_after: Instant,
}

impl CacheEntry {
    /// Returns `true` while the entry is still fresh at `now`.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now < self.stale_after
    }
}

/// Read access to the shared request cache.
///
/// Implementations must be cheap to call and must not block on I/O; the skip
/// check runs on the timer task right before a dispatch.
pub trait QueryCache: Send + Sync {
    /// Returns the entry stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
}

/// Decides whether a prefetch for `cache_key` can be skipped.
///
/// Returns `true` only when a fresh entry exists. A missing entry, a stale
/// entry, or a cache read error all return `false` so the caller falls
/// through to a real fetch.
pub fn should_skip(cache: &dyn QueryCache, cache_key: &str, now: Instant) -> bool {
    match cache.get(cache_key) {
        Ok(Some(entry)) => entry.is_fresh_at(now),
        Ok(None) => false,
        Err(e) => {
            debug!(key = cache_key, error = %e, "cache read failed, fetching anyway");
            false
        }
    }
}

/// A process-local query cache with per-entry time-to-live.
///
/// Stale entries are kept until overwritten or invalidated, matching
/// stale-while-revalidate caches that still serve stale data.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `data` under `key`, fresh for `ttl` from now.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let entry = CacheEntry {
            key: key.clone(),
            data: data.into(),
            fetched_at: now,
            stale_after: now + ttl,
        };
        self.lock().insert(key, entry);
    }

    /// Removes the entry for `key`. Returns `true` if one existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Removes every entry whose key starts with `prefix`, returning how many.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl QueryCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.lock().get(key).cloned())
    }
}
