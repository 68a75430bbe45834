//! Time-tracking domain types, as exchanged with the remote service.
//!
//! Field names are camelCase on the wire. Unknown fields are ignored so the
//! types survive additive API changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub active_workspace: Option<String>,
    #[serde(default)]
    pub default_workspace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub billable: bool,
}

/// A customer the workspace bills. Named to avoid clashing with HTTP clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub project_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
}

/// A saved entry template the user can start with one selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub billable: bool,
}

/// Start/end of a time entry. `end` is absent while the timer runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub billable: bool,
    pub time_interval: TimeInterval,
}

impl TimeEntry {
    /// Whether the timer is still running.
    pub fn is_running(&self) -> bool {
        self.time_interval.end.is_none()
    }
}

/// Payload for starting or updating a time entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTimeEntry {
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub billable: bool,
}

impl NewTimeEntry {
    /// A running entry starting at `start`.
    pub fn starting_at(start: DateTime<Utc>, description: impl Into<String>) -> Self {
        Self {
            start,
            end: None,
            description: description.into(),
            project_id: None,
            task_id: None,
            tag_ids: Vec::new(),
            billable: false,
        }
    }

    /// Attach the entry to a project.
    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Attach the entry to a task.
    pub fn task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Start from a favorite's project, task, tags and billable flag.
    pub fn from_favorite(start: DateTime<Utc>, favorite: &Favorite) -> Self {
        Self {
            start,
            end: None,
            description: favorite.description.clone(),
            project_id: favorite.project_id.clone(),
            task_id: favorite.task_id.clone(),
            tag_ids: favorite.tag_ids.clone(),
            billable: favorite.billable,
        }
    }
}

/// Payload for creating a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub billable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_entry_has_no_end() {
        let json = r#"{
            "id": "e1",
            "description": "writing",
            "projectId": "p1",
            "timeInterval": { "start": "2024-03-01T09:00:00Z", "end": null },
            "someNewField": 1
        }"#;
        let entry: TimeEntry = serde_json::from_str(json).unwrap();
        assert!(entry.is_running());
        assert_eq!(entry.project_id.as_deref(), Some("p1"));
        assert!(entry.tag_ids.is_empty());
    }

    #[test]
    fn new_entry_omits_unset_fields() {
        let start = "2024-03-01T09:00:00Z".parse().unwrap();
        let body = serde_json::to_value(NewTimeEntry::starting_at(start, "review").project("p1")).unwrap();
        assert_eq!(body["projectId"], "p1");
        assert!(body.get("end").is_none());
        assert!(body.get("taskId").is_none());
        assert!(body.get("tagIds").is_none());
    }

    #[test]
    fn favorite_seeds_entry() {
        let favorite = Favorite {
            id: "f1".into(),
            description: "standup".into(),
            project_id: Some("p1".into()),
            task_id: Some("t1".into()),
            tag_ids: vec!["tag".into()],
            billable: true,
        };
        let start = "2024-03-01T09:00:00Z".parse().unwrap();
        let entry = NewTimeEntry::from_favorite(start, &favorite);
        assert_eq!(entry.description, "standup");
        assert_eq!(entry.task_id.as_deref(), Some("t1"));
        assert!(entry.billable);
    }
}
