//! Punchclock - time-tracking client with a deduplicating response cache
//!
//! This crate provides a [`TimeTrackingApi`] trait over a remote
//! time-tracking service, an HTTP implementation of it, and a
//! [`CachedClient`] overlay that keeps reference data in a persistent file
//! cache and short-lived reads in memory.
//!
//! # Example
//!
//! ```rust,no_run
//! use punchclock::{CachedClient, FileCache, HttpApi, Settings, TimeTrackingApi};
//!
//! #[tokio::main]
//! async fn main() -> punchclock::Result<()> {
//!     let settings = Settings::load(None)?;
//!     let api = HttpApi::with_base_url("your-api-key", &settings.api.base_url)?;
//!
//!     let mut client = CachedClient::new(api).with_policy(settings.cache_policy());
//!     if let Some(config) = settings.file_cache_config()? {
//!         client = client.with_file_cache(FileCache::new(config));
//!     }
//!
//!     let user = client.current_user().await?;
//!     for workspace in client.workspaces().await? {
//!         let projects = client.projects(&workspace.id).await?;
//!         println!("{}: {} projects", workspace.name, projects.len());
//!     }
//!     if let Some(ws) = &user.active_workspace
//!         && let Some(entry) = client.running_entry(ws, &user.id).await?
//!     {
//!         println!("running since {}", entry.time_interval.start);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod telemetry;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types at crate root
pub use cache::{
    CacheEntry, CacheStats, FileCache, FileCacheConfig, LockConfig, LockTimeoutPolicy,
    MemoryCache, MemoryCacheConfig,
};
pub use client::{CachePolicy, CachedClient, HttpApi, RetryConfig, TimeTrackingApi};
pub use config::Settings;
pub use error::{CacheError, PunchclockError, Result};
