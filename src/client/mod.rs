//! Remote access to the time-tracking service.
//!
//! - [`TimeTrackingApi`]: the operations commands are written against
//! - [`HttpApi`]: talks to the service over HTTP
//! - [`CachedClient`]: wraps any accessor with the cache tiers

mod api;
mod cached;
mod http;
pub mod policy;
mod retry;
pub mod types;

pub use api::TimeTrackingApi;
pub use cached::{CachedClient, ClientCacheStats};
pub use http::{DEFAULT_BASE_URL, HttpApi};
pub use policy::{
    CachePolicy, Operation, PolicyEntry, REFERENCE_TTL, RUNNING_ENTRY_TTL, Tier, keys,
};
pub use retry::RetryConfig;
pub use types::{
    ClientRef, Favorite, NewProject, NewTimeEntry, Project, Tag, Task, TimeEntry, TimeInterval,
    User, Workspace,
};
