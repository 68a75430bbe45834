//! Punchclock error types

use std::path::PathBuf;
use std::time::Duration;

/// Punchclock error types.
///
/// `Clone` so that one failed fetch can be handed, unchanged, to every
/// caller that joined it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PunchclockError {
    // Remote service errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed: invalid or missing API key")]
    AuthenticationFailed,

    #[error("resource not found: {0}")]
    NotFound(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The task driving a shared fetch was torn down before it finished
    /// (runtime shutdown).
    #[error("fetch aborted for cache key '{0}'")]
    FetchAborted(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl PunchclockError {
    /// Whether retrying the same request may succeed.
    ///
    /// Transport failures, rate limiting and 5xx responses are transient;
    /// everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            PunchclockError::Http(_) | PunchclockError::RateLimited { .. } => true,
            PunchclockError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Server-provided retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PunchclockError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PunchclockError {
    fn from(err: serde_json::Error) -> Self {
        PunchclockError::Json(err.to_string())
    }
}

/// Non-fatal cache-layer failure.
///
/// Returned from cache writes (`set`, `delete`, `clear`). Never surfaced out
/// of `get` or `get_or_fetch`: there the cache degrades to a miss or to an
/// unpersisted value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error on {path}: {message}")]
    Io {
        path: PathBuf,
        kind: std::io::ErrorKind,
        message: String,
    },

    #[error("cache serialization error: {0}")]
    Serialize(String),

    #[error("timed out after {waited:?} waiting for cache lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("invalid cache file name '{0}'")]
    InvalidFileName(String),

    #[error("no cache directory available on this platform")]
    NoCacheDir,
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialize(err.to_string())
    }
}

/// Result type alias for Punchclock operations
pub type Result<T> = std::result::Result<T, PunchclockError>;
