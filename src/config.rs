//! Configuration loading for punch.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `<config dir>/punchclock/config.toml` (user)
//! 3. Built-in defaults
//!
//! The API key is never read from this file; the binary takes it from the
//! `PUNCHCLOCK_API_KEY` environment variable.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{
    FileCacheConfig, LockConfig, LockTimeoutPolicy, MemoryCacheConfig, store::default_cache_dir,
};
use crate::client::{CachePolicy, DEFAULT_BASE_URL};
use crate::{PunchclockError, Result};

/// Client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Remote service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSettings {
    /// Service base URL (default: the public Clockify API).
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// Cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Whether to cache at all (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cache file name inside `dir` (default: cache.json).
    #[serde(default = "default_filename")]
    pub filename: String,
    /// Cache directory (default: the platform cache dir).
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// TTL for entries set without an explicit TTL.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// TTL for reference data (default: one week).
    #[serde(default = "default_reference_ttl_secs")]
    pub reference_ttl_secs: u64,
    /// TTL for the running entry (default: 10s). 0 disables caching it.
    #[serde(default = "default_running_ttl_secs")]
    pub running_ttl_secs: u64,
    #[serde(default = "default_sync_debounce_ms")]
    pub sync_debounce_ms: u64,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Age after which a leftover lock file is taken over.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
    /// Write anyway when the lock cannot be acquired (default: false).
    #[serde(default)]
    pub proceed_without_lock: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            filename: default_filename(),
            dir: None,
            max_entries: default_max_entries(),
            max_file_size_bytes: default_max_file_size(),
            default_ttl_secs: default_ttl_secs(),
            reference_ttl_secs: default_reference_ttl_secs(),
            running_ttl_secs: default_running_ttl_secs(),
            sync_debounce_ms: default_sync_debounce_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            stale_lock_secs: default_stale_lock_secs(),
            proceed_without_lock: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_filename() -> String {
    crate::cache::store::DEFAULT_FILE_NAME.to_string()
}

fn default_max_entries() -> usize {
    crate::cache::file::DEFAULT_MAX_ENTRIES
}

fn default_max_file_size() -> u64 {
    crate::cache::file::DEFAULT_MAX_FILE_SIZE_BYTES
}

fn default_ttl_secs() -> u64 {
    crate::cache::file::DEFAULT_FILE_TTL.as_secs()
}

fn default_reference_ttl_secs() -> u64 {
    crate::client::REFERENCE_TTL.as_secs()
}

fn default_running_ttl_secs() -> u64 {
    crate::client::RUNNING_ENTRY_TTL.as_secs()
}

fn default_sync_debounce_ms() -> u64 {
    crate::cache::file::DEFAULT_SYNC_DEBOUNCE.as_millis() as u64
}

fn default_lock_timeout_ms() -> u64 {
    2_000
}

fn default_stale_lock_secs() -> u64 {
    10
}

impl Settings {
    /// Load settings from the standard locations.
    ///
    /// An explicit path must exist. Without one, a missing user config
    /// yields the defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PunchclockError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            PunchclockError::Configuration(msg) => {
                PunchclockError::Configuration(format!("{path:?}: {msg}"))
            }
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content).map_err(|e| {
            PunchclockError::Configuration(format!("Failed to parse config: {e}"))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(PunchclockError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        Ok(Self::user_config_path().filter(|p| p.exists()))
    }

    /// `<config dir>/punchclock/config.toml`, if the platform has one.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("punchclock").join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(PunchclockError::Configuration(
                "cache.max_entries must be at least 1".into(),
            ));
        }
        if self.cache.filename.trim().is_empty() {
            return Err(PunchclockError::Configuration(
                "cache.filename must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn memory_cache_config(&self) -> MemoryCacheConfig {
        MemoryCacheConfig::new().default_ttl(Duration::from_secs(self.cache.default_ttl_secs))
    }

    /// File cache config, or `None` when caching is disabled.
    pub fn file_cache_config(&self) -> Result<Option<FileCacheConfig>> {
        if !self.cache.enabled {
            return Ok(None);
        }
        let c = &self.cache;
        let dir = match &c.dir {
            Some(dir) => dir.clone(),
            None => default_cache_dir()?,
        };
        let on_timeout = if c.proceed_without_lock {
            LockTimeoutPolicy::Proceed
        } else {
            LockTimeoutPolicy::Fail
        };
        let config = FileCacheConfig::in_dir(dir, &c.filename)?
            .max_entries(c.max_entries)
            .max_file_size_bytes(c.max_file_size_bytes)
            .default_ttl(Duration::from_secs(c.default_ttl_secs))
            .sync_debounce(Duration::from_millis(c.sync_debounce_ms))
            .lock(
                LockConfig::new()
                    .timeout(Duration::from_millis(c.lock_timeout_ms))
                    .stale_after(Duration::from_secs(c.stale_lock_secs))
                    .on_timeout(on_timeout),
            );
        Ok(Some(config))
    }

    pub fn cache_policy(&self) -> CachePolicy {
        if !self.cache.enabled {
            return CachePolicy::disabled();
        }
        let policy = CachePolicy::with_ttls(
            Duration::from_secs(self.cache.reference_ttl_secs),
            Duration::from_secs(self.cache.running_ttl_secs),
        );
        if self.cache.running_ttl_secs == 0 {
            policy.with(
                crate::client::Operation::RunningEntry,
                crate::client::PolicyEntry::uncached(),
            )
        } else {
            policy
        }
    }
}
