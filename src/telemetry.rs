//! Telemetry metric name constants.
//!
//! Centralised metric names for the cache layer. Consumers install their own
//! `metrics` recorder; without one, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `punchclock_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `tier`: cache tier: "memory" or "file"

/// Lookups answered from a valid cache entry.
///
/// Labels: `tier`.
pub const CACHE_HITS_TOTAL: &str = "punchclock_cache_hits_total";

/// Lookups that found no valid entry (absent, expired or undecodable).
///
/// Labels: `tier`.
pub const CACHE_MISSES_TOTAL: &str = "punchclock_cache_misses_total";

/// Fetch functions actually dispatched by `get_or_fetch`.
///
/// Labels: `tier`.
pub const FETCHES_TOTAL: &str = "punchclock_fetches_total";

/// `get_or_fetch` callers that joined an in-flight fetch instead of
/// starting their own.
///
/// Labels: `tier`.
pub const COALESCED_TOTAL: &str = "punchclock_coalesced_total";

/// Entries dropped from the persisted store by the count or byte caps.
///
/// Labels: `tier`.
pub const EVICTIONS_TOTAL: &str = "punchclock_evictions_total";

/// Cache writes that failed and were degraded to "not persisted".
///
/// Labels: `tier`.
pub const WRITE_FAILURES_TOTAL: &str = "punchclock_write_failures_total";

pub(crate) const TIER_MEMORY: &str = "memory";
pub(crate) const TIER_FILE: &str = "file";
