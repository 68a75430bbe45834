//! HTTP accessor for the Clockify REST API.
//!
//! See: <https://docs.clockify.me/>

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::api::TimeTrackingApi;
use super::retry::{RetryConfig, with_retry};
use super::types::{
    ClientRef, Favorite, NewProject, NewTimeEntry, Project, Tag, Task, TimeEntry, User, Workspace,
};
use crate::{PunchclockError, Result};

/// Default base URL for the Clockify API
pub const DEFAULT_BASE_URL: &str = "https://api.clockify.me/api/v1";

/// Header carrying the API key.
const API_KEY_HEADER: &str = "X-Api-Key";

/// Remote accessor that talks to the service directly, with no caching.
///
/// Reads are retried on transient failures according to [`RetryConfig`];
/// mutations are sent exactly once.
#[derive(Clone)]
pub struct HttpApi {
    api_key: String,
    http: Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpApi {
    /// Create an accessor for the public API.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create an accessor with a custom base URL (for testing with wiremock).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(PunchclockError::Configuration("API key is empty".into()));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("punchclock/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PunchclockError::Http(e.to_string()))?;

        Ok(Self {
            api_key,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }

    /// Replace the retry policy for reads.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        with_retry(&self.retry, path, || self.send::<(), T>(Method::GET, path, None)).await
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "sending request");

        let mut request = self
            .http
            .request(method, &url)
            .header(API_KEY_HEADER, &self.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PunchclockError::Http(e.to_string()))?;
        let response = handle_response_errors(response, path).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PunchclockError::Http(e.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Map non-success statuses to typed errors.
async fn handle_response_errors(response: Response, resource: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status.as_u16() {
        401 | 403 => Err(PunchclockError::AuthenticationFailed),
        404 => Err(PunchclockError::NotFound(resource.to_string())),
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(PunchclockError::RateLimited { retry_after })
        }
        code => {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body).unwrap_or_else(|| status.to_string());
            Err(PunchclockError::Api {
                status: code,
                message,
            })
        }
    }
}

/// Pull `message` out of the service's JSON error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

#[derive(Serialize)]
struct StopRequest {
    end: DateTime<Utc>,
}

#[async_trait]
impl TimeTrackingApi for HttpApi {
    #[instrument(name = "api.current_user", skip(self))]
    async fn current_user(&self) -> Result<User> {
        self.get_json("/user").await
    }

    #[instrument(name = "api.workspaces", skip(self))]
    async fn workspaces(&self) -> Result<Vec<Workspace>> {
        self.get_json("/workspaces").await
    }

    #[instrument(name = "api.projects", skip(self))]
    async fn projects(&self, workspace_id: &str) -> Result<Vec<Project>> {
        self.get_json(&format!("/workspaces/{workspace_id}/projects"))
            .await
    }

    #[instrument(name = "api.clients", skip(self))]
    async fn clients(&self, workspace_id: &str) -> Result<Vec<ClientRef>> {
        self.get_json(&format!("/workspaces/{workspace_id}/clients"))
            .await
    }

    #[instrument(name = "api.tasks", skip(self))]
    async fn tasks(&self, workspace_id: &str, project_id: &str) -> Result<Vec<Task>> {
        self.get_json(&format!(
            "/workspaces/{workspace_id}/projects/{project_id}/tasks"
        ))
        .await
    }

    #[instrument(name = "api.tags", skip(self))]
    async fn tags(&self, workspace_id: &str) -> Result<Vec<Tag>> {
        self.get_json(&format!("/workspaces/{workspace_id}/tags"))
            .await
    }

    #[instrument(name = "api.favorites", skip(self))]
    async fn favorites(&self, workspace_id: &str) -> Result<Vec<Favorite>> {
        self.get_json(&format!("/workspaces/{workspace_id}/favorite-entries"))
            .await
    }

    #[instrument(name = "api.running_entry", skip(self))]
    async fn running_entry(&self, workspace_id: &str, user_id: &str) -> Result<Option<TimeEntry>> {
        let entries: Vec<TimeEntry> = self
            .get_json(&format!(
                "/workspaces/{workspace_id}/user/{user_id}/time-entries?in-progress=true"
            ))
            .await?;
        Ok(entries.into_iter().find(TimeEntry::is_running))
    }

    #[instrument(name = "api.start_entry", skip(self, entry))]
    async fn start_entry(&self, workspace_id: &str, entry: &NewTimeEntry) -> Result<TimeEntry> {
        self.send(
            Method::POST,
            &format!("/workspaces/{workspace_id}/time-entries"),
            Some(entry),
        )
        .await
    }

    #[instrument(name = "api.update_entry", skip(self, entry))]
    async fn update_entry(
        &self,
        workspace_id: &str,
        entry_id: &str,
        entry: &NewTimeEntry,
    ) -> Result<TimeEntry> {
        self.send(
            Method::PUT,
            &format!("/workspaces/{workspace_id}/time-entries/{entry_id}"),
            Some(entry),
        )
        .await
    }

    #[instrument(name = "api.stop_entry", skip(self))]
    async fn stop_entry(
        &self,
        workspace_id: &str,
        user_id: &str,
        end: DateTime<Utc>,
    ) -> Result<TimeEntry> {
        self.send(
            Method::PATCH,
            &format!("/workspaces/{workspace_id}/user/{user_id}/time-entries"),
            Some(&StopRequest { end }),
        )
        .await
    }

    #[instrument(name = "api.create_project", skip(self, project))]
    async fn create_project(&self, workspace_id: &str, project: &NewProject) -> Result<Project> {
        self.send(
            Method::POST,
            &format!("/workspaces/{workspace_id}/projects"),
            Some(project),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(
            HttpApi::new("  "),
            Err(PunchclockError::Configuration(_))
        ));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = HttpApi::with_base_url("key", "http://localhost:1234/api/").unwrap();
        assert_eq!(api.base_url(), "http://localhost:1234/api");
    }

    #[test]
    fn error_message_reads_json_body() {
        assert_eq!(
            error_message(r#"{"message":"Project name exists","code":501}"#).as_deref(),
            Some("Project name exists")
        );
        assert_eq!(error_message("<html>"), None);
    }
}
