//! Advisory cross-process lock over a marker file.
//!
//! The marker is created with `create_new`, so exactly one process wins.
//! Losers retry with exponential backoff until the timeout elapses. The
//! winner writes a token unique to this acquisition into the marker.
//!
//! A marker whose modification time is older than `stale_after` is assumed
//! to belong to a crashed process. It is taken over by renaming it to a name
//! of our own, which only one contender can do, and checking that the file
//! we moved is still the stale one. A live marker moved by mistake is linked
//! back into place.
//!
//! The guard removes the marker on drop, but only while it still holds the
//! guard's token.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;
use tracing::{debug, warn};

use super::store::sibling_path;
use crate::error::CacheError;

/// What to do when the lock cannot be acquired in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockTimeoutPolicy {
    /// Fail the write with [`CacheError::LockTimeout`] (default).
    #[default]
    Fail,
    /// Write anyway, unsynchronized. Another writer may be lost.
    Proceed,
}

/// Configuration for lock acquisition.
///
/// ```rust
/// # use punchclock::{LockConfig, LockTimeoutPolicy};
/// # use std::time::Duration;
/// let config = LockConfig::new()
///     .timeout(Duration::from_secs(5))
///     .on_timeout(LockTimeoutPolicy::Proceed);
/// assert_eq!(config.delay_for_attempt(0), Duration::from_millis(10));
/// ```
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Give up after this long. Default: 2s.
    pub timeout: Duration,
    /// Delay before the first retry. Default: 10ms.
    pub initial_delay: Duration,
    /// Cap on the delay between retries. Default: 200ms.
    pub max_delay: Duration,
    /// Markers older than this are considered abandoned. Default: 10s.
    pub stale_after: Duration,
    /// Behaviour on timeout. Default: fail.
    pub on_timeout: LockTimeoutPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            stale_after: Duration::from_secs(10),
            on_timeout: LockTimeoutPolicy::Fail,
        }
    }
}

impl LockConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the acquisition timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the age after which a marker is treated as abandoned.
    pub fn stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    /// Set the timeout policy.
    pub fn on_timeout(mut self, policy: LockTimeoutPolicy) -> Self {
        self.on_timeout = policy;
        self
    }

    /// Backoff before retry `attempt` (0-indexed): `initial_delay * 2^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Held advisory lock. Removes its marker on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    token: String,
}

impl FileLock {
    /// Acquire the lock marker at `path`.
    ///
    /// Returns `Ok(None)` when the timeout elapsed and the policy is
    /// [`LockTimeoutPolicy::Proceed`].
    pub async fn acquire(path: &Path, config: &LockConfig) -> Result<Option<FileLock>, CacheError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }

        let token = new_token();
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut marker) => {
                    if let Err(e) = marker.write_all(token.as_bytes()) {
                        // Without a token the marker cannot be released.
                        let _ = std::fs::remove_file(path);
                        return Err(CacheError::io(path, e));
                    }
                    return Ok(Some(FileLock {
                        path: path.to_path_buf(),
                        token,
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if marker_age(path).is_some_and(|age| age > config.stale_after) {
                        take_over_stale(path, &token, config.stale_after)?;
                        continue;
                    }
                }
                Err(e) => return Err(CacheError::io(path, e)),
            }

            let waited = started.elapsed();
            if waited >= config.timeout {
                return match config.on_timeout {
                    LockTimeoutPolicy::Fail => Err(CacheError::LockTimeout {
                        path: path.to_path_buf(),
                        waited,
                    }),
                    LockTimeoutPolicy::Proceed => {
                        warn!(
                            path = %path.display(),
                            waited_ms = waited.as_millis() as u64,
                            "cache lock timed out, writing unsynchronized"
                        );
                        Ok(None)
                    }
                };
            }

            let delay = config
                .delay_for_attempt(attempt)
                .min(config.timeout - waited);
            debug!(path = %path.display(), attempt, delay_ms = delay.as_millis() as u64, "cache lock busy");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Marker path held by this guard.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match std::fs::read(&self.path) {
            Ok(content) if content == self.token.as_bytes() => {}
            Ok(_) => {
                warn!(path = %self.path.display(), "cache lock was taken over, leaving it in place");
                return;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read cache lock");
                return;
            }
        }
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to release cache lock");
        }
    }
}

/// Token identifying one acquisition: pid, clock and a process-wide counter.
fn new_token() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos:x}-{seq}", std::process::id())
}

/// Move a stale marker out of the way.
///
/// The rename is atomic, so of several contenders only one moves a given
/// file. If the moved file turns out to be fresh, another contender already
/// replaced the stale marker; the fresh one is linked back, which fails
/// rather than overwrite a marker created in the meantime.
fn take_over_stale(path: &Path, token: &str, stale_after: Duration) -> Result<(), CacheError> {
    let aside = sibling_path(path, &format!(".stale-{token}"));
    match std::fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CacheError::io(path, e)),
    }

    if marker_age(&aside).is_some_and(|age| age > stale_after) {
        warn!(path = %path.display(), "removed stale cache lock");
    } else {
        debug!(path = %path.display(), "stale cache lock already replaced, restoring");
        if let Err(e) = std::fs::hard_link(&aside, path) {
            warn!(path = %path.display(), error = %e, "could not restore cache lock");
        }
    }
    if let Err(e) = std::fs::remove_file(&aside)
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %aside.display(), error = %e, "failed to remove moved cache lock");
    }
    Ok(())
}

/// Wall-clock age of the marker, if it can be determined.
fn marker_age(path: &Path) -> Option<Duration> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().or_else(|_| meta.created()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}
