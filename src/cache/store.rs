//! Persistent entry store: one JSON record on disk.
//!
//! The record maps cache keys to [`CacheEntry`] values:
//!
//! ```json
//! { "workspaces": { "value": [...], "expiresAt": 1718000000000, "lastAccessed": 1717400000000 } }
//! ```
//!
//! Writes go to a per-process temp file that is then renamed over the
//! record, so readers see either the old or the new content, never a
//! partial write. A record that fails to parse is treated as empty.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use tracing::warn;

use super::entry::CacheEntry;
use crate::error::CacheError;

/// Key → entry, as persisted.
pub type PersistedStore = HashMap<String, CacheEntry<serde_json::Value>>;

/// Default record file name.
pub const DEFAULT_FILE_NAME: &str = "cache.json";

/// Default cache directory: `~/.cache/punchclock` (platform equivalent).
pub fn default_cache_dir() -> Result<PathBuf, CacheError> {
    dirs::cache_dir()
        .map(|dir| dir.join("punchclock"))
        .ok_or(CacheError::NoCacheDir)
}

/// Validate a record file name.
///
/// Only a single plain path component is accepted: no separators, no `.` or
/// `..`, no NUL bytes.
pub fn sanitize_file_name(name: &str) -> Result<&str, CacheError> {
    let invalid = || CacheError::InvalidFileName(name.to_string());
    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(invalid()),
    }
}

/// Append `suffix` to the full file name (`cache.json` → `cache.json.lock`).
pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Load the record at `path`.
///
/// A missing file is an empty store. So is a corrupt one (logged). Other
/// read failures are returned so callers can keep what they already have.
pub fn load(path: &Path) -> Result<PersistedStore, CacheError> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PersistedStore::new()),
        Err(e) => return Err(CacheError::io(path, e)),
    };
    match serde_json::from_slice(&content) {
        Ok(store) => Ok(store),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt cache record, starting empty");
            Ok(PersistedStore::new())
        }
    }
}

/// Serialize a store exactly as it will be written.
pub fn encode(store: &PersistedStore) -> Result<Vec<u8>, CacheError> {
    Ok(serde_json::to_vec(store)?)
}

/// Replace the record at `path` with `bytes` (atomic write via tmp + rename).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    write_atomic_with(path, bytes, |_| Ok(()))
}

/// [`write_atomic`] with a hook that runs after the temp file is complete
/// and before the rename.
fn write_atomic_with<H>(path: &Path, bytes: &[u8], before_rename: H) -> Result<(), CacheError>
where
    H: FnOnce(&Path) -> std::io::Result<()>,
{
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
    }

    let tmp_path = sibling_path(path, &format!(".tmp.{}", std::process::id()));
    let written = (|| {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        before_rename(&tmp_path)?;
        std::fs::rename(&tmp_path, path)
    })();

    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(CacheError::io(path, e));
    }
    Ok(())
}

/// Drop entries that are no longer valid at `now`. Returns the count.
pub fn prune_expired(store: &mut PersistedStore, now: u64) -> usize {
    let before = store.len();
    store.retain(|_, entry| entry.is_valid(now));
    before - store.len()
}

/// Remove the least-recently-accessed entry.
///
/// Ties are broken by key so eviction is deterministic.
pub fn evict_lru(store: &mut PersistedStore) -> Option<String> {
    let victim = store
        .iter()
        .min_by(|(ka, a), (kb, b)| a.last_accessed.cmp(&b.last_accessed).then_with(|| ka.cmp(kb)))
        .map(|(key, _)| key.clone())?;
    store.remove(&victim);
    Some(victim)
}

/// Evict LRU entries until at most `max_entries` remain. Returns the count.
pub fn enforce_max_entries(store: &mut PersistedStore, max_entries: usize) -> usize {
    let mut evicted = 0;
    while store.len() > max_entries && evict_lru(store).is_some() {
        evicted += 1;
    }
    evicted
}

/// Evict LRU entries until the encoded store fits in `max_bytes`.
///
/// Returns the final encoding and the number of evictions.
pub fn enforce_max_bytes(
    store: &mut PersistedStore,
    max_bytes: u64,
) -> Result<(Vec<u8>, usize), CacheError> {
    let mut evicted = 0;
    loop {
        let bytes = encode(store)?;
        if bytes.len() as u64 <= max_bytes || evict_lru(store).is_none() {
            return Ok((bytes, evicted));
        }
        evicted += 1;
    }
}
