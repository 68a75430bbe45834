//! Cache-aware overlay over a [`TimeTrackingApi`].
//!
//! # Routing
//!
//! Each read looks up its [`Operation`] in the [`CachePolicy`] and is routed
//! to the File-Tier, the Memory-Tier or straight to the wrapped accessor.
//! When the policy asks for the File-Tier but no file cache is configured,
//! the Memory-Tier is used with the same TTL.
//!
//! # Invalidation
//!
//! Mutations always go to the wrapped accessor. Only after it reports
//! success are the affected keys removed from both tiers; a failed mutation
//! leaves every cached value in place.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::api::TimeTrackingApi;
use super::policy::{CachePolicy, Operation, PolicyEntry, Tier, keys};
use super::types::{
    ClientRef, Favorite, NewProject, NewTimeEntry, Project, Tag, Task, TimeEntry, User, Workspace,
};
use crate::Result;
use crate::cache::{CacheStats, FileCache, MemoryCache};
use crate::error::CacheError;

/// Combined statistics of both tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClientCacheStats {
    pub memory: CacheStats,
    /// `None` when no file cache is configured.
    pub file: Option<CacheStats>,
}

/// Wraps a remote accessor with the memory and file caches.
///
/// ```rust,no_run
/// # use punchclock::{CachedClient, FileCache, FileCacheConfig, HttpApi, TimeTrackingApi};
/// # async fn example() -> punchclock::Result<()> {
/// let api = HttpApi::new("api-key")?;
/// let file = FileCache::new(FileCacheConfig::in_default_dir("cache.json")?);
/// let client = CachedClient::new(api).with_file_cache(file);
///
/// // First call hits the network, later calls within a week read the file.
/// let workspaces = client.workspaces().await?;
/// # Ok(())
/// # }
/// ```
pub struct CachedClient<A> {
    api: Arc<A>,
    memory: MemoryCache,
    file: Option<FileCache>,
    policy: CachePolicy,
}

impl<A: TimeTrackingApi + 'static> CachedClient<A> {
    /// Wrap `api` with a default memory cache and no file cache.
    pub fn new(api: A) -> Self {
        Self::from_arc(Arc::new(api))
    }

    /// Wrap an accessor that is shared elsewhere.
    pub fn from_arc(api: Arc<A>) -> Self {
        Self {
            api,
            memory: MemoryCache::default(),
            file: None,
            policy: CachePolicy::default(),
        }
    }

    pub fn with_memory_cache(mut self, memory: MemoryCache) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_file_cache(mut self, file: FileCache) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The wrapped accessor.
    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn memory_cache(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn file_cache(&self) -> Option<&FileCache> {
        self.file.as_ref()
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Drop everything from both tiers, including the cache file's contents.
    pub async fn clear_caches(&self) -> std::result::Result<(), CacheError> {
        self.memory.clear();
        if let Some(file) = &self.file {
            file.clear().await?;
        }
        Ok(())
    }

    pub fn stats(&self) -> ClientCacheStats {
        ClientCacheStats {
            memory: self.memory.stats(),
            file: self.file.as_ref().map(FileCache::stats),
        }
    }

    async fn cached<V, F, Fut>(&self, op: Operation, key: String, fetch: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce(Arc<A>) -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let PolicyEntry { tier, ttl } = self.policy.lookup(op);
        let api = Arc::clone(&self.api);
        match (tier, &self.file) {
            (Tier::None, _) => fetch(api).await,
            (Tier::File, Some(file)) => file.get_or_fetch(&key, || fetch(api), Some(ttl)).await,
            (Tier::File, None) | (Tier::Memory, _) => {
                self.memory
                    .get_or_fetch(&key, || fetch(api), Some(ttl))
                    .await
            }
        }
    }

    /// Remove one key from both tiers.
    async fn invalidate_key(&self, key: &str) {
        self.memory.delete(key);
        if let Some(file) = &self.file
            && let Err(e) = file.delete(key).await
        {
            warn!(key, error = %e, "failed to invalidate file cache entry");
        }
        debug!(key, "invalidated");
    }

    /// Remove every key containing `pattern` from both tiers.
    async fn invalidate_pattern(&self, pattern: &str) {
        let mut removed = self.memory.delete_pattern(pattern);
        if let Some(file) = &self.file {
            match file.delete_pattern(pattern).await {
                Ok(n) => removed += n,
                Err(e) => warn!(pattern, error = %e, "failed to invalidate file cache entries"),
            }
        }
        debug!(pattern, removed, "invalidated");
    }
}

#[async_trait]
impl<A: TimeTrackingApi + 'static> TimeTrackingApi for CachedClient<A> {
    async fn current_user(&self) -> Result<User> {
        self.cached(Operation::CurrentUser, keys::current_user(), |api| async move {
            api.current_user().await
        })
        .await
    }

    async fn workspaces(&self) -> Result<Vec<Workspace>> {
        self.cached(Operation::Workspaces, keys::workspaces(), |api| async move {
            api.workspaces().await
        })
        .await
    }

    async fn projects(&self, workspace_id: &str) -> Result<Vec<Project>> {
        let ws = workspace_id.to_string();
        self.cached(
            Operation::Projects,
            keys::projects(workspace_id),
            |api| async move { api.projects(&ws).await },
        )
        .await
    }

    async fn clients(&self, workspace_id: &str) -> Result<Vec<ClientRef>> {
        let ws = workspace_id.to_string();
        self.cached(
            Operation::Clients,
            keys::clients(workspace_id),
            |api| async move { api.clients(&ws).await },
        )
        .await
    }

    async fn tasks(&self, workspace_id: &str, project_id: &str) -> Result<Vec<Task>> {
        let (ws, project) = (workspace_id.to_string(), project_id.to_string());
        self.cached(
            Operation::Tasks,
            keys::tasks(workspace_id, project_id),
            |api| async move { api.tasks(&ws, &project).await },
        )
        .await
    }

    async fn tags(&self, workspace_id: &str) -> Result<Vec<Tag>> {
        let ws = workspace_id.to_string();
        self.cached(
            Operation::Tags,
            keys::tags(workspace_id),
            |api| async move { api.tags(&ws).await },
        )
        .await
    }

    async fn favorites(&self, workspace_id: &str) -> Result<Vec<Favorite>> {
        let ws = workspace_id.to_string();
        self.cached(
            Operation::Favorites,
            keys::favorites(workspace_id),
            |api| async move { api.favorites(&ws).await },
        )
        .await
    }

    async fn running_entry(&self, workspace_id: &str, user_id: &str) -> Result<Option<TimeEntry>> {
        let (ws, user) = (workspace_id.to_string(), user_id.to_string());
        self.cached(
            Operation::RunningEntry,
            keys::running_entry(workspace_id, user_id),
            |api| async move { api.running_entry(&ws, &user).await },
        )
        .await
    }

    async fn start_entry(&self, workspace_id: &str, entry: &NewTimeEntry) -> Result<TimeEntry> {
        let created = self.api.start_entry(workspace_id, entry).await?;
        self.invalidate_pattern(&keys::running_prefix(workspace_id))
            .await;
        Ok(created)
    }

    async fn update_entry(
        &self,
        workspace_id: &str,
        entry_id: &str,
        entry: &NewTimeEntry,
    ) -> Result<TimeEntry> {
        let updated = self.api.update_entry(workspace_id, entry_id, entry).await?;
        self.invalidate_pattern(&keys::running_prefix(workspace_id))
            .await;
        Ok(updated)
    }

    async fn stop_entry(
        &self,
        workspace_id: &str,
        user_id: &str,
        end: DateTime<Utc>,
    ) -> Result<TimeEntry> {
        let stopped = self.api.stop_entry(workspace_id, user_id, end).await?;
        self.invalidate_pattern(&keys::running_prefix(workspace_id))
            .await;
        Ok(stopped)
    }

    async fn create_project(&self, workspace_id: &str, project: &NewProject) -> Result<Project> {
        let created = self.api.create_project(workspace_id, project).await?;
        self.invalidate_key(&keys::projects(workspace_id)).await;
        Ok(created)
    }
}
