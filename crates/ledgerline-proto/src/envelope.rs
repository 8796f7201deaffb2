use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::{ProtoError, ProtoResult};

/// Closed set of top-level `type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    Notification,
    Activity,
    MilestoneCreated,
    MilestoneUpdated,
    TaskUpdate,
    TaskAssignment,
    TaskStatusChange,
    SubscribeTasks,
    UnsubscribeTasks,
}

impl MessageKind {
    pub const ALL: [MessageKind; 10] = [
        MessageKind::Chat,
        MessageKind::Notification,
        MessageKind::Activity,
        MessageKind::MilestoneCreated,
        MessageKind::MilestoneUpdated,
        MessageKind::TaskUpdate,
        MessageKind::TaskAssignment,
        MessageKind::TaskStatusChange,
        MessageKind::SubscribeTasks,
        MessageKind::UnsubscribeTasks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::Notification => "notification",
            MessageKind::Activity => "activity",
            MessageKind::MilestoneCreated => "milestone_created",
            MessageKind::MilestoneUpdated => "milestone_updated",
            MessageKind::TaskUpdate => "task_update",
            MessageKind::TaskAssignment => "task_assignment",
            MessageKind::TaskStatusChange => "task_status_change",
            MessageKind::SubscribeTasks => "subscribe_tasks",
            MessageKind::UnsubscribeTasks => "unsubscribe_tasks",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtoError::UnknownKind(s.to_string()))
    }
}

/// Raw frame as it travels over the socket.
///
/// `kind` stays a string here so that frames with kinds this build does not
/// know about still parse; [`crate::SyncMessage::from_envelope`] decides what
/// to do with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(kind: MessageKind, payload: &T) -> ProtoResult<Self> {
        let payload = serde_json::to_value(payload).map_err(|source| ProtoError::Encode {
            kind: kind.as_str(),
            source,
        })?;
        Ok(Self {
            kind: kind.as_str().to_string(),
            payload,
        })
    }

    /// Parses one inbound text frame.
    pub fn parse(text: &str) -> ProtoResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| ProtoError::Malformed(err.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(ProtoError::Malformed("frame is not a JSON object".into()));
        };
        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            Some(_) => return Err(ProtoError::Malformed("`type` is not a string".into())),
            None => return Err(ProtoError::Malformed("missing `type`".into())),
        };
        let payload = object.remove("payload").unwrap_or(Value::Null);
        Ok(Self { kind, payload })
    }

    pub fn kind(&self) -> ProtoResult<MessageKind> {
        self.kind.parse()
    }

    pub fn to_json(&self) -> ProtoResult<String> {
        serde_json::to_string(self).map_err(|source| ProtoError::Encode {
            kind: "envelope",
            source,
        })
    }
}
