use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ActivityEvent, ActivityType, ClientId, Envelope, MessageKind, MilestoneId, ProjectId,
    ProtoError, ProtoResult, UserId,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

/// Server-pushed toast. `type: "error"` is rendered as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    #[serde(alias = "body")]
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

impl Notification {
    pub fn is_error(&self) -> bool {
        self.subtype.as_deref() == Some("error")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneChange {
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<MilestoneId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: String,
}

/// A frame whose payload has been checked against its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    Chat(ChatMessage),
    Notification(Notification),
    Activity(ActivityEvent),
    MilestoneCreated(MilestoneChange),
    MilestoneUpdated(MilestoneChange),
}

impl SyncMessage {
    pub fn from_envelope(envelope: Envelope) -> ProtoResult<Self> {
        let kind = envelope.kind()?;
        let payload = envelope.payload;
        let message = match kind {
            MessageKind::Chat => SyncMessage::Chat(payload_as(kind, payload)?),
            MessageKind::Notification => SyncMessage::Notification(payload_as(kind, payload)?),
            MessageKind::Activity => SyncMessage::Activity(ActivityEvent::from_payload(payload)?),
            MessageKind::MilestoneCreated => {
                SyncMessage::MilestoneCreated(payload_as(kind, payload)?)
            }
            MessageKind::MilestoneUpdated => {
                SyncMessage::MilestoneUpdated(payload_as(kind, payload)?)
            }
            MessageKind::TaskUpdate => {
                SyncMessage::Activity(ActivityEvent::decode(ActivityType::TaskUpdate, payload)?)
            }
            MessageKind::TaskAssignment => SyncMessage::Activity(ActivityEvent::decode(
                ActivityType::TaskAssignment,
                payload,
            )?),
            MessageKind::TaskStatusChange => SyncMessage::Activity(ActivityEvent::decode(
                ActivityType::TaskStatusChange,
                payload,
            )?),
            MessageKind::SubscribeTasks => SyncMessage::Activity(ActivityEvent::decode(
                ActivityType::SubscribeTasks,
                payload,
            )?),
            MessageKind::UnsubscribeTasks => SyncMessage::Activity(ActivityEvent::decode(
                ActivityType::UnsubscribeTasks,
                payload,
            )?),
        };
        Ok(message)
    }

    /// Parses and validates one text frame.
    pub fn parse(text: &str) -> ProtoResult<Self> {
        Self::from_envelope(Envelope::parse(text)?)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            SyncMessage::Chat(_) => MessageKind::Chat,
            SyncMessage::Notification(_) => MessageKind::Notification,
            SyncMessage::Activity(_) => MessageKind::Activity,
            SyncMessage::MilestoneCreated(_) => MessageKind::MilestoneCreated,
            SyncMessage::MilestoneUpdated(_) => MessageKind::MilestoneUpdated,
        }
    }

    pub fn to_envelope(&self) -> ProtoResult<Envelope> {
        let kind = self.kind();
        match self {
            SyncMessage::Chat(chat) => Envelope::new(kind, chat),
            SyncMessage::Notification(notification) => Envelope::new(kind, notification),
            SyncMessage::Activity(event) => Envelope::new(kind, event),
            SyncMessage::MilestoneCreated(change) | SyncMessage::MilestoneUpdated(change) => {
                Envelope::new(kind, change)
            }
        }
    }

    pub fn to_json(&self) -> ProtoResult<String> {
        self.to_envelope()?.to_json()
    }
}

impl From<ActivityEvent> for SyncMessage {
    fn from(event: ActivityEvent) -> Self {
        SyncMessage::Activity(event)
    }
}

fn payload_as<T: serde::de::DeserializeOwned>(kind: MessageKind, payload: Value) -> ProtoResult<T> {
    serde_json::from_value(payload).map_err(|source| ProtoError::InvalidPayload {
        kind: kind.as_str().to_string(),
        source,
    })
}
