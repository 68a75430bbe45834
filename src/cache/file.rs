//! Durable cache tier backed by a single JSON record.
//!
//! # Reads
//!
//! Reads are served from an in-memory mirror of the record. The mirror is
//! trusted for `sync_debounce` after it was last loaded; the first read after
//! that reloads from disk. A burst of lookups inside one command therefore
//! costs one disk read, while writes from other processes become visible
//! within one debounce window.
//!
//! A hit refreshes `last_accessed` in the mirror only. The next write from
//! this process carries the newer stamp to disk, so LRU eviction reflects
//! reads without reads ever taking the lock.
//!
//! # Writes
//!
//! Every mutation is a read-modify-write under the advisory lock
//! ([`FileLock`]): reload the record, prune expired entries, apply the
//! change, evict to the entry and byte caps, write to a temp file and rename
//! it over the record, refresh the mirror. Reloading first means a write from
//! another process is never clobbered by a stale mirror.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::{CacheEntry, epoch_millis};
use super::lock::{FileLock, LockConfig};
use super::pending::{Flight, PendingRegistry, Ticket};
use super::store::{self, PersistedStore};
use super::{CacheStats, lock};
use crate::Result;
use crate::error::CacheError;
use crate::telemetry::{self, TIER_FILE};

/// Default maximum number of persisted entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1_000;

/// Default maximum record size: 5 MiB.
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// Default TTL for file entries when a call passes no override: 5 minutes.
pub const DEFAULT_FILE_TTL: Duration = Duration::from_secs(300);

/// Default mirror freshness window.
pub const DEFAULT_SYNC_DEBOUNCE: Duration = Duration::from_millis(1_000);

/// Configuration for the file tier.
///
/// ```rust
/// # use punchclock::FileCacheConfig;
/// let dir = std::env::temp_dir();
/// let config = FileCacheConfig::in_dir(&dir, "cache.json")
///     .unwrap()
///     .max_entries(500);
/// assert!(config.path.ends_with("cache.json"));
/// assert!(FileCacheConfig::in_dir(&dir, "../escape.json").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    /// Location of the record.
    pub path: PathBuf,
    /// Maximum persisted entries. Default: 1,000.
    pub max_entries: usize,
    /// Maximum serialized record size. Default: 5 MiB.
    pub max_file_size_bytes: u64,
    /// TTL applied when a call passes no override. Default: 5 minutes.
    pub default_ttl: Duration,
    /// How long a loaded mirror is trusted. Default: 1s.
    pub sync_debounce: Duration,
    /// Advisory lock settings.
    pub lock: LockConfig,
}

impl FileCacheConfig {
    /// Config for a record at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_entries: DEFAULT_MAX_ENTRIES,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            default_ttl: DEFAULT_FILE_TTL,
            sync_debounce: DEFAULT_SYNC_DEBOUNCE,
            lock: LockConfig::default(),
        }
    }

    /// Config for `file_name` inside `dir`. The name must be a single plain
    /// path component.
    pub fn in_dir(dir: impl AsRef<Path>, file_name: &str) -> std::result::Result<Self, CacheError> {
        let file_name = store::sanitize_file_name(file_name)?;
        Ok(Self::new(dir.as_ref().join(file_name)))
    }

    /// Config for `file_name` in the platform cache directory
    /// (`~/.cache/punchclock/` on Linux).
    pub fn in_default_dir(file_name: &str) -> std::result::Result<Self, CacheError> {
        Self::in_dir(store::default_cache_dir()?, file_name)
    }

    /// Set the maximum number of persisted entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the maximum serialized record size.
    pub fn max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    /// Set the default time-to-live.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the mirror freshness window.
    pub fn sync_debounce(mut self, window: Duration) -> Self {
        self.sync_debounce = window;
        self
    }

    /// Set the lock configuration.
    pub fn lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    fn lock_path(&self) -> PathBuf {
        store::sibling_path(&self.path, ".lock")
    }
}

#[derive(Default)]
struct Mirror {
    entries: PersistedStore,
    last_sync: Option<Instant>,
}

struct FileInner {
    config: FileCacheConfig,
    lock_path: PathBuf,
    mirror: Mutex<Mirror>,
    pending: PendingRegistry,
}

impl FileInner {
    /// Reload the mirror if its debounce window has passed.
    fn refresh_if_stale(&self, mirror: &mut Mirror) {
        let fresh = mirror
            .last_sync
            .is_some_and(|at| at.elapsed() < self.config.sync_debounce);
        if fresh {
            return;
        }
        match store::load(&self.config.path) {
            Ok(mut entries) => {
                carry_access_times(&mut entries, &mirror.entries);
                mirror.entries = entries;
            }
            Err(e) => {
                warn!(path = %self.config.path.display(), error = %e, "cache read failed, keeping mirror");
            }
        }
        mirror.last_sync = Some(Instant::now());
    }

    /// Valid value for `key` from the mirror, bumping its access time.
    ///
    /// Expired entries leave the mirror; the disk copy is pruned on the next
    /// write. A value that does not decode as `V` is a miss.
    fn lookup<V: DeserializeOwned>(&self, key: &str, refresh: bool) -> Option<V> {
        let mut mirror = lock(&self.mirror);
        if refresh {
            self.refresh_if_stale(&mut mirror);
        }

        let now = epoch_millis();
        let entry = mirror.entries.get_mut(key)?;
        if !entry.is_valid(now) {
            mirror.entries.remove(key);
            return None;
        }
        entry.last_accessed = now;
        match serde_json::from_value(entry.value.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Read-modify-write of the record under the advisory lock.
    async fn atomic_update<R>(
        &self,
        mutate: impl FnOnce(&mut PersistedStore) -> R,
    ) -> std::result::Result<R, CacheError> {
        let _guard = FileLock::acquire(&self.lock_path, &self.config.lock).await?;

        let mut disk = store::load(&self.config.path)?;
        let now = epoch_millis();
        {
            let mirror = lock(&self.mirror);
            carry_access_times(&mut disk, &mirror.entries);
        }
        store::prune_expired(&mut disk, now);

        let result = mutate(&mut disk);

        let mut evicted = store::enforce_max_entries(&mut disk, self.config.max_entries);
        let (bytes, by_size) = store::enforce_max_bytes(&mut disk, self.config.max_file_size_bytes)?;
        evicted += by_size;
        if evicted > 0 {
            debug!(path = %self.config.path.display(), evicted, "evicted cache entries");
            metrics::counter!(telemetry::EVICTIONS_TOTAL, "tier" => TIER_FILE)
                .increment(evicted as u64);
        }

        store::write_atomic(&self.config.path, &bytes)?;

        let mut mirror = lock(&self.mirror);
        mirror.entries = disk;
        mirror.last_sync = Some(Instant::now());
        Ok(result)
    }

    async fn store_value<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> std::result::Result<(), CacheError> {
        let entry = self.entry(value, ttl)?;
        self.atomic_update(|disk| {
            disk.insert(key.to_string(), entry);
        })
        .await
    }

    /// Persist the result of a registered fetch unless the fetch was
    /// forgotten. The ticket is checked under the lock, after any `delete`
    /// that forgot it has written.
    async fn store_fetched<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
        ticket: &Ticket,
    ) -> std::result::Result<(), CacheError> {
        if !ticket.is_current() {
            return Ok(());
        }
        let entry = self.entry(value, ttl)?;
        self.atomic_update(|disk| {
            if ticket.is_current() {
                disk.insert(key.to_string(), entry);
            }
        })
        .await
    }

    fn entry<V: Serialize>(
        &self,
        value: &V,
        ttl: Option<Duration>,
    ) -> std::result::Result<CacheEntry<serde_json::Value>, CacheError> {
        let value = serde_json::to_value(value)?;
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        Ok(CacheEntry::new(value, epoch_millis(), ttl))
    }
}

/// Copy newer `last_accessed` stamps from the mirror onto matching disk
/// entries. Entries rewritten by another process (different expiry) keep
/// their own stamp.
fn carry_access_times(disk: &mut PersistedStore, mirror: &PersistedStore) {
    for (key, entry) in disk.iter_mut() {
        if let Some(seen) = mirror.get(key)
            && seen.expires_at == entry.expires_at
            && seen.last_accessed > entry.last_accessed
        {
            entry.last_accessed = seen.last_accessed;
        }
    }
}

/// File-backed cache tier with request coalescing.
///
/// Cheap to clone; clones share the mirror and registry. Separate
/// instances (or processes) pointed at the same path share the record.
#[derive(Clone)]
pub struct FileCache {
    inner: Arc<FileInner>,
}

impl FileCache {
    /// Create a tier for the record described by `config`.
    ///
    /// Nothing is read until the first lookup.
    pub fn new(config: FileCacheConfig) -> Self {
        let lock_path = config.lock_path();
        Self {
            inner: Arc::new(FileInner {
                config,
                lock_path,
                mirror: Mutex::new(Mirror::default()),
                pending: PendingRegistry::new(),
            }),
        }
    }

    /// Location of the record.
    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    /// Look up a valid entry. Never fails; any problem is a miss.
    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        let found = self.inner.lookup(key, true);
        let metric = if found.is_some() {
            telemetry::CACHE_HITS_TOTAL
        } else {
            telemetry::CACHE_MISSES_TOTAL
        };
        metrics::counter!(metric, "tier" => TIER_FILE).increment(1);
        found
    }

    /// Persist `value` under `key`, replacing any previous entry.
    pub async fn set<V: Serialize>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> std::result::Result<(), CacheError> {
        self.inner.store_value(key, value, ttl).await
    }

    /// Remove one entry. Returns whether it existed on disk.
    ///
    /// A fetch for `key` still in flight is forgotten and will not persist
    /// its result.
    pub async fn delete(&self, key: &str) -> std::result::Result<bool, CacheError> {
        self.inner.pending.forget(|k| k == key);
        self.inner
            .atomic_update(|disk| disk.remove(key).is_some())
            .await
    }

    /// Remove every entry whose key contains `pattern`. Returns the count.
    ///
    /// Matching in-flight fetches are forgotten as in [`delete`](Self::delete).
    pub async fn delete_pattern(&self, pattern: &str) -> std::result::Result<usize, CacheError> {
        self.inner.pending.forget(|k| k.contains(pattern));
        self.inner
            .atomic_update(|disk| {
                let before = disk.len();
                disk.retain(|key, _| !key.contains(pattern));
                before - disk.len()
            })
            .await
    }

    /// Empty the record and forget in-flight fetches.
    pub async fn clear(&self) -> std::result::Result<(), CacheError> {
        self.inner.pending.clear();
        self.inner.atomic_update(|disk| disk.clear()).await
    }

    /// Return the cached value, or run `fetch` once for all concurrent
    /// callers of the same key and persist its result.
    ///
    /// Persisting is best effort: if the write fails (lock timeout, I/O),
    /// the fetched value is still returned and the failure is logged.
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
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if let Some(value) = self.get::<V>(key) {
            debug!(key, "file cache hit");
            return Ok(value);
        }

        let inner = Arc::clone(&self.inner);
        let pending = fetch();
        let flight = self.inner.pending.join_or_start(
            key,
            || self.inner.lookup::<V>(key, false),
            |ticket| {
                metrics::counter!(telemetry::FETCHES_TOTAL, "tier" => TIER_FILE).increment(1);
                let key = key.to_string();
                async move {
                    let value = pending.await?;
                    if let Err(e) = inner.store_fetched(&key, &value, ttl, &ticket).await {
                        warn!(key = %key, error = %e, "failed to persist fetched value");
                        metrics::counter!(telemetry::WRITE_FAILURES_TOTAL, "tier" => TIER_FILE)
                            .increment(1);
                    }
                    Ok(value)
                }
            },
        );

        if let Flight::Joined(_) = &flight {
            debug!(key, "joining in-flight fetch");
            metrics::counter!(telemetry::COALESCED_TOTAL, "tier" => TIER_FILE).increment(1);
        }
        flight.outcome().await
    }

    /// Mirror size and in-flight count. Does not touch the disk.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cache_size: lock(&self.inner.mirror).entries.len(),
            pending_requests: self.inner.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_in(dir: &Path) -> FileCache {
        FileCache::new(FileCacheConfig::new(dir.join("cache.json")))
    }

    #[test]
    fn carry_access_times_keeps_newest_stamp() {
        let mut disk = PersistedStore::new();
        disk.insert("same".into(), CacheEntry { value: json!(1), expires_at: 100, last_accessed: 10 });
        disk.insert("rewritten".into(), CacheEntry { value: json!(2), expires_at: 200, last_accessed: 10 });

        let mut mirror = PersistedStore::new();
        mirror.insert("same".into(), CacheEntry { value: json!(1), expires_at: 100, last_accessed: 50 });
        mirror.insert("rewritten".into(), CacheEntry { value: json!(0), expires_at: 150, last_accessed: 90 });

        carry_access_times(&mut disk, &mirror);
        assert_eq!(disk["same"].last_accessed, 50);
        assert_eq!(disk["rewritten"].last_accessed, 10);
    }

    #[tokio::test]
    async fn lock_marker_removed_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set("k", &1u32, None).await.unwrap();
        assert!(!dir.path().join("cache.json.lock").exists());
    }

    #[tokio::test]
    async fn write_prunes_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set("short", &1u32, Some(Duration::from_millis(1))).await.unwrap();
        std::thread::sleep(Duration::from_millis(5));
        cache.set("long", &2u32, None).await.unwrap();

        let disk = store::load(cache.path()).unwrap();
        assert!(!disk.contains_key("short"));
        assert!(disk.contains_key("long"));
    }

    #[tokio::test]
    async fn hit_bumps_access_time_carried_by_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(FileCacheConfig::new(dir.path().join("cache.json")).max_entries(2));

        cache.set("a", &1u32, None).await.unwrap();
        std::thread::sleep(Duration::from_millis(3));
        cache.set("b", &2u32, None).await.unwrap();
        std::thread::sleep(Duration::from_millis(3));

        // Reading "a" makes "b" the least recently used.
        assert_eq!(cache.get::<u32>("a"), Some(1));
        std::thread::sleep(Duration::from_millis(3));
        cache.set("c", &3u32, None).await.unwrap();

        let disk = store::load(cache.path()).unwrap();
        assert!(disk.contains_key("a"));
        assert!(!disk.contains_key("b"));
        assert!(disk.contains_key("c"));
    }

    #[tokio::test]
    async fn undecodable_value_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set("k", &"text", None).await.unwrap();
        assert_eq!(cache.get::<u32>("k"), None);
        assert_eq!(cache.get::<String>("k").as_deref(), Some("text"));
    }
}
