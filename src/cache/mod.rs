//! Caching subsystem.
//!
//! Two independent tiers share one `get_or_fetch` contract:
//!
//! - [`MemoryCache`]: process-local TTL cache. Short-lived reads (the
//!   running timer) live here for seconds to minutes.
//!
//! - [`FileCache`]: durable JSON record on disk, shared by every CLI
//!   invocation. Reference data (workspaces, projects, tasks…) lives here for
//!   about a week. Writes go through an advisory lock file and an atomic
//!   temp-file rename; reads use an in-memory mirror that is refreshed from
//!   disk at most once per debounce window.
//!
//! Both tiers coalesce concurrent fetches for the same key: while a fetch is
//! in flight, later callers join it instead of starting their own, and every
//! joiner receives the same value or the same error.
//!
//! Expiry is lazy. Nothing sweeps in the background; expired entries are
//! dropped when read, and the file tier prunes them on every write.
//!
//! Cache faults never fail a command. `get` degrades to a miss and
//! `get_or_fetch` returns the fetched value even when persisting it fails.
//! Only explicit writes (`set`, `delete`, `clear`) report a [`CacheError`].
//!
//! [`CacheError`]: crate::CacheError

pub mod entry;
pub mod file;
pub mod lock;
pub mod memory;
mod pending;
pub mod store;

pub use entry::{CacheEntry, epoch_millis};
pub use file::{FileCache, FileCacheConfig};
pub use lock::{LockConfig, LockTimeoutPolicy};
pub use memory::{MemoryCache, MemoryCacheConfig};
pub use store::PersistedStore;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Point-in-time counters for a cache tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held (expired-but-unread entries included).
    pub cache_size: usize,
    /// Fetches currently in flight.
    pub pending_requests: usize,
}

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Cache state is always left consistent between statements, so a poisoned
/// guard is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
