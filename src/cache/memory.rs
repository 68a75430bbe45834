//! Process-local TTL cache with request coalescing.
//!
//! Values are stored type-erased and cloned out on a hit, so one
//! [`MemoryCache`] can hold workspaces next to a running timer. Nothing is
//! serialized; nothing outlives the process.
//!
//! Expiry is measured with [`tokio::time::Instant`], which lets tests drive
//! the clock with `tokio::time::pause()` / `advance()`.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::pending::{Flight, PendingRegistry, Ticket};
use super::{CacheStats, lock};
use crate::Result;
use crate::telemetry::{self, TIER_MEMORY};

/// Default time-to-live for memory entries: 5 minutes.
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(300);

/// Deadline used when `now + ttl` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Configuration for the memory tier.
///
/// ```rust
/// # use punchclock::MemoryCacheConfig;
/// # use std::time::Duration;
/// let config = MemoryCacheConfig::new().default_ttl(Duration::from_secs(30));
/// assert_eq!(config.default_ttl, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// TTL applied when a call passes no override. Default: 5 minutes.
    pub default_ttl: Duration,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_MEMORY_TTL,
        }
    }
}

impl MemoryCacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default time-to-live.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

struct MemoryEntry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

struct MemoryInner {
    config: MemoryCacheConfig,
    entries: Mutex<HashMap<String, MemoryEntry>>,
    pending: PendingRegistry,
}

impl MemoryInner {
    /// Valid value for `key`, dropping it if expired. No metrics.
    fn lookup<V: Clone + 'static>(&self, key: &str) -> Option<V> {
        let mut entries = lock(&self.entries);
        let entry = entries.get(key)?;
        if Instant::now() >= entry.expires_at {
            entries.remove(key);
            return None;
        }
        entry.value.downcast_ref::<V>().cloned()
    }

    fn store<V: Send + Sync + 'static>(&self, key: String, value: V, ttl: Option<Duration>) {
        let entry = self.entry(Arc::new(value), ttl);
        lock(&self.entries).insert(key, entry);
    }

    /// Store the result of a registered fetch unless the fetch was forgotten.
    ///
    /// The ticket is checked again after inserting. A `delete` that ran in
    /// between has either removed the entry itself or forgotten the ticket,
    /// in which case the entry is taken back out.
    fn store_fetched<V: Send + Sync + 'static>(
        &self,
        key: String,
        value: V,
        ttl: Option<Duration>,
        ticket: &Ticket,
    ) {
        if !ticket.is_current() {
            return;
        }
        let value: Arc<dyn Any + Send + Sync> = Arc::new(value);
        let entry = self.entry(Arc::clone(&value), ttl);
        lock(&self.entries).insert(key.clone(), entry);

        if !ticket.is_current() {
            let mut entries = lock(&self.entries);
            if entries
                .get(&key)
                .is_some_and(|entry| Arc::ptr_eq(&entry.value, &value))
            {
                entries.remove(&key);
            }
        }
    }

    fn entry(&self, value: Arc<dyn Any + Send + Sync>, ttl: Option<Duration>) -> MemoryEntry {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        MemoryEntry {
            value,
            expires_at: deadline(Instant::now(), ttl),
        }
    }
}

/// `now + ttl`, saturating to a far-future deadline.
fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// In-memory TTL cache with in-flight request coalescing.
///
/// Cheap to clone; clones share the same entries and registry.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                config,
                entries: Mutex::new(HashMap::new()),
                pending: PendingRegistry::new(),
            }),
        }
    }

    /// Look up a valid entry.
    ///
    /// Expired entries are removed. An entry stored with a different type
    /// than `V` is reported as a miss and left in place.
    pub fn get<V: Clone + 'static>(&self, key: &str) -> Option<V> {
        let found = self.inner.lookup(key);
        let metric = if found.is_some() {
            telemetry::CACHE_HITS_TOTAL
        } else {
            telemetry::CACHE_MISSES_TOTAL
        };
        metrics::counter!(metric, "tier" => TIER_MEMORY).increment(1);
        found
    }

    /// Store `value` under `key`, replacing any previous entry.
    ///
    /// `ttl` defaults to the configured default TTL.
    pub fn set<V: Send + Sync + 'static>(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
    ) {
        self.inner.store(key.into(), value, ttl);
    }

    /// Remove one entry. Returns whether it existed.
    ///
    /// A fetch for `key` still in flight is forgotten and will not store its
    /// result.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.pending.forget(|k| k == key);
        lock(&self.inner.entries).remove(key).is_some()
    }

    /// Remove every entry whose key contains `pattern`. Returns the count.
    ///
    /// Matching in-flight fetches are forgotten as in [`delete`](Self::delete).
    pub fn delete_pattern(&self, pattern: &str) -> usize {
        self.inner.pending.forget(|k| k.contains(pattern));
        let mut entries = lock(&self.inner.entries);
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        before - entries.len()
    }

    /// Drop all entries and forget in-flight fetches.
    pub fn clear(&self) {
        lock(&self.inner.entries).clear();
        self.inner.pending.clear();
    }

    /// Return the cached value, or run `fetch` once for all concurrent
    /// callers of the same key and cache its result.
    ///
    /// A failed fetch caches nothing; its error is returned to every caller
    /// that joined it.
    ///
    /// `fetch` is called before the in-flight registry is consulted, so it may
    /// use this cache. Its future is dropped unpolled when the call joins an
    /// existing fetch.
    pub async fn get_or_fetch<V, F, Fut>(
        &self,
        key: &str,
        fetch: F,
        ttl: Option<Duration>,
    ) -> Result<V>
    where
        V: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if let Some(value) = self.get::<V>(key) {
            debug!(key, "memory cache hit");
            return Ok(value);
        }

        let inner = Arc::clone(&self.inner);
        let pending = fetch();
        let flight = self.inner.pending.join_or_start(
            key,
            || self.inner.lookup::<V>(key),
            |ticket| {
                metrics::counter!(telemetry::FETCHES_TOTAL, "tier" => TIER_MEMORY).increment(1);
                let key = key.to_string();
                async move {
                    let value = pending.await?;
                    inner.store_fetched(key, value.clone(), ttl, &ticket);
                    Ok(value)
                }
            },
        );

        if let Flight::Joined(_) = &flight {
            debug!(key, "joining in-flight fetch");
            metrics::counter!(telemetry::COALESCED_TOTAL, "tier" => TIER_MEMORY).increment(1);
        }
        flight.outcome().await
    }

    /// Current entry and in-flight counts.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cache_size: lock(&self.inner.entries).len(),
            pending_requests: self.inner.pending.len(),
        }
    }
}
