use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::{ClientId, DocumentId, ProjectId, ProtoError, ProtoResult, TaskId, UserId};

/// Nested `activityType` discriminator carried by `activity` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityType {
    ProjectUpdate,
    DocumentUpload,
    ClientUpdate,
    TaskUpdate,
    TaskAssignment,
    TaskStatusChange,
    SubscribeTasks,
    UnsubscribeTasks,
    Subscribe,
    Unsubscribe,
}

impl ActivityType {
    pub const ALL: [ActivityType; 10] = [
        ActivityType::ProjectUpdate,
        ActivityType::DocumentUpload,
        ActivityType::ClientUpdate,
        ActivityType::TaskUpdate,
        ActivityType::TaskAssignment,
        ActivityType::TaskStatusChange,
        ActivityType::SubscribeTasks,
        ActivityType::UnsubscribeTasks,
        ActivityType::Subscribe,
        ActivityType::Unsubscribe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::ProjectUpdate => "project_update",
            ActivityType::DocumentUpload => "document_upload",
            ActivityType::ClientUpdate => "client_update",
            ActivityType::TaskUpdate => "task_update",
            ActivityType::TaskAssignment => "task_assignment",
            ActivityType::TaskStatusChange => "task_status_change",
            ActivityType::SubscribeTasks => "subscribe_tasks",
            ActivityType::UnsubscribeTasks => "unsubscribe_tasks",
            ActivityType::Subscribe => "subscribe",
            ActivityType::Unsubscribe => "unsubscribe",
        }
    }

    /// Subscription bookkeeping rather than a change notification.
    pub fn is_subscription(self) -> bool {
        matches!(
            self,
            ActivityType::SubscribeTasks
                | ActivityType::UnsubscribeTasks
                | ActivityType::Subscribe
                | ActivityType::Unsubscribe
        )
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtoError::UnknownActivity(s.to_string()))
    }
}

/// Fields a task edit touched. Any subset may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub task_id: TaskId,
    #[serde(default)]
    pub changes: TaskChanges,
    pub updated_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub assigned_to: UserId,
    pub assigned_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusChange {
    pub task_id: TaskId,
    pub status: String,
    pub updated_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
}

/// Advisory interest registration sent when a view mounts or unmounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubscription {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUpdate {
    pub client_id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<UserId>,
}

/// Payload of an `activity` frame, tagged by `activityType`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "activityType", rename_all = "snake_case")]
pub enum ActivityEvent {
    ProjectUpdate(ProjectUpdate),
    DocumentUpload(DocumentUpload),
    ClientUpdate(ClientUpdate),
    TaskUpdate(TaskUpdate),
    TaskAssignment(TaskAssignment),
    TaskStatusChange(TaskStatusChange),
    SubscribeTasks(TaskSubscription),
    UnsubscribeTasks(TaskSubscription),
    Subscribe(TaskSubscription),
    Unsubscribe(TaskSubscription),
}

impl ActivityEvent {
    pub fn activity_type(&self) -> ActivityType {
        match self {
            ActivityEvent::ProjectUpdate(_) => ActivityType::ProjectUpdate,
            ActivityEvent::DocumentUpload(_) => ActivityType::DocumentUpload,
            ActivityEvent::ClientUpdate(_) => ActivityType::ClientUpdate,
            ActivityEvent::TaskUpdate(_) => ActivityType::TaskUpdate,
            ActivityEvent::TaskAssignment(_) => ActivityType::TaskAssignment,
            ActivityEvent::TaskStatusChange(_) => ActivityType::TaskStatusChange,
            ActivityEvent::SubscribeTasks(_) => ActivityType::SubscribeTasks,
            ActivityEvent::UnsubscribeTasks(_) => ActivityType::UnsubscribeTasks,
            ActivityEvent::Subscribe(_) => ActivityType::Subscribe,
            ActivityEvent::Unsubscribe(_) => ActivityType::Unsubscribe,
        }
    }

    /// Decodes an `activity` payload using its nested `activityType`.
    pub fn from_payload(payload: Value) -> ProtoResult<Self> {
        let activity_type = match payload.get("activityType") {
            Some(Value::String(name)) => name.parse::<ActivityType>()?,
            Some(_) => {
                return Err(ProtoError::Malformed("`activityType` is not a string".into()))
            }
            None => return Err(ProtoError::Malformed("activity without `activityType`".into())),
        };
        Self::decode(activity_type, payload)
    }

    /// Decodes a payload whose activity type is already known, either from
    /// the nested tag or from a top-level frame kind such as `task_update`.
    pub fn decode(activity_type: ActivityType, payload: Value) -> ProtoResult<Self> {
        let event = match activity_type {
            ActivityType::ProjectUpdate => ActivityEvent::ProjectUpdate(field(activity_type, payload)?),
            ActivityType::DocumentUpload => {
                ActivityEvent::DocumentUpload(field(activity_type, payload)?)
            }
            ActivityType::ClientUpdate => ActivityEvent::ClientUpdate(field(activity_type, payload)?),
            ActivityType::TaskUpdate => ActivityEvent::TaskUpdate(field(activity_type, payload)?),
            ActivityType::TaskAssignment => {
                ActivityEvent::TaskAssignment(field(activity_type, payload)?)
            }
            ActivityType::TaskStatusChange => {
                ActivityEvent::TaskStatusChange(field(activity_type, payload)?)
            }
            ActivityType::SubscribeTasks => {
                ActivityEvent::SubscribeTasks(field(activity_type, payload)?)
            }
            ActivityType::UnsubscribeTasks => {
                ActivityEvent::UnsubscribeTasks(field(activity_type, payload)?)
            }
            ActivityType::Subscribe => ActivityEvent::Subscribe(field(activity_type, payload)?),
            ActivityType::Unsubscribe => ActivityEvent::Unsubscribe(field(activity_type, payload)?),
        };
        Ok(event)
    }
}

fn field<T: serde::de::DeserializeOwned>(activity_type: ActivityType, payload: Value) -> ProtoResult<T> {
    serde_json::from_value(payload).map_err(|source| ProtoError::InvalidPayload {
        kind: activity_type.as_str().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_change_serializes_with_nested_tag() {
        let event = ActivityEvent::TaskStatusChange(TaskStatusChange {
            task_id: TaskId(7),
            status: "completed".into(),
            updated_by: UserId(3),
            project_id: None,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "activityType": "task_status_change",
                "taskId": 7,
                "status": "completed",
                "updatedBy": 3
            })
        );
        assert_eq!(ActivityEvent::from_payload(value).unwrap(), event);
    }

    #[test]
    fn task_update_carries_only_changed_fields() {
        let changes = TaskChanges {
            priority: Some("high".into()),
            hours: Some(2.5),
            ..TaskChanges::default()
        };
        let event = ActivityEvent::TaskUpdate(TaskUpdate {
            task_id: TaskId(11),
            changes,
            updated_by: UserId(1),
            project_id: Some(ProjectId(4)),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["changes"], json!({"priority": "high", "hours": 2.5}));
        assert_eq!(value["projectId"], 4);
    }

    #[test]
    fn unknown_and_missing_activity_types_are_distinguished() {
        let unknown = ActivityEvent::from_payload(json!({"activityType": "invoice_paid"}));
        assert!(matches!(unknown, Err(ProtoError::UnknownActivity(name)) if name == "invoice_paid"));

        let missing = ActivityEvent::from_payload(json!({"taskId": 1}));
        assert!(matches!(missing, Err(ProtoError::Malformed(_))));
    }

    #[test]
    fn wrong_shape_is_an_invalid_payload() {
        let err = ActivityEvent::from_payload(json!({
            "activityType": "task_assignment",
            "taskId": 5
        }))
        .unwrap_err();
        assert!(matches!(err, ProtoError::InvalidPayload { ref kind, .. } if kind == "task_assignment"));
    }

    #[test]
    fn subscription_types_are_flagged() {
        assert!(ActivityType::SubscribeTasks.is_subscription());
        assert!(ActivityType::Unsubscribe.is_subscription());
        assert!(!ActivityType::TaskUpdate.is_subscription());
    }
}
