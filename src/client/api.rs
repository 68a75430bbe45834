//! Core TimeTrackingApi trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{
    ClientRef, Favorite, NewProject, NewTimeEntry, Project, Tag, Task, TimeEntry, User, Workspace,
};
use crate::Result;

/// Operations the CLI needs from the remote time-tracking service.
///
/// Implemented by the plain HTTP accessor ([`HttpApi`](super::HttpApi)) and
/// by the caching overlay ([`CachedClient`](super::CachedClient)), so
/// commands are written once against this trait.
#[async_trait]
pub trait TimeTrackingApi: Send + Sync {
    /// The user the API key belongs to.
    async fn current_user(&self) -> Result<User>;

    /// Workspaces the user is a member of.
    async fn workspaces(&self) -> Result<Vec<Workspace>>;

    /// Projects in a workspace.
    async fn projects(&self, workspace_id: &str) -> Result<Vec<Project>>;

    /// Clients in a workspace.
    async fn clients(&self, workspace_id: &str) -> Result<Vec<ClientRef>>;

    /// Tasks of one project.
    async fn tasks(&self, workspace_id: &str, project_id: &str) -> Result<Vec<Task>>;

    /// Tags in a workspace.
    async fn tags(&self, workspace_id: &str) -> Result<Vec<Tag>>;

    /// The user's favorite entries in a workspace.
    async fn favorites(&self, workspace_id: &str) -> Result<Vec<Favorite>>;

    /// The user's running entry, if a timer is on.
    async fn running_entry(&self, workspace_id: &str, user_id: &str) -> Result<Option<TimeEntry>>;

    /// Create a time entry; without `end` this starts a timer.
    async fn start_entry(&self, workspace_id: &str, entry: &NewTimeEntry) -> Result<TimeEntry>;

    /// Replace an existing entry.
    async fn update_entry(
        &self,
        workspace_id: &str,
        entry_id: &str,
        entry: &NewTimeEntry,
    ) -> Result<TimeEntry>;

    /// Stop the user's running timer at `end`.
    async fn stop_entry(
        &self,
        workspace_id: &str,
        user_id: &str,
        end: DateTime<Utc>,
    ) -> Result<TimeEntry>;

    /// Create a project.
    async fn create_project(&self, workspace_id: &str, project: &NewProject) -> Result<Project>;
}
