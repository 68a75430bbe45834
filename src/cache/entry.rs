//! Entry shape shared by the persisted store and its in-memory mirror.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A cached value with its expiry and recency stamps.
///
/// Timestamps are wall-clock epoch milliseconds so they stay meaningful
/// across processes reading the same file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: u64,
    pub last_accessed: u64,
}

impl<V> CacheEntry<V> {
    /// Create an entry stamped at `now` that expires `ttl` later.
    pub fn new(value: V, now: u64, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now.saturating_add(duration_millis(ttl)),
            last_accessed: now,
        }
    }

    /// An entry is valid only while `now < expires_at`.
    pub fn is_valid(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .unwrap_or(0)
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
