//! Ledgerline sync protocol: the `{type, payload}` envelope exchanged over the
//! portal's push channel, the closed set of message kinds, and the query keys
//! the REST layer and the sync layer both use to name cached reads.
//!
//! Every frame is a UTF-8 JSON object with exactly two fields:
//! - `type`: one of [`MessageKind`]
//! - `payload`: kind specific, validated by [`SyncMessage::from_envelope`]

mod activity;
mod envelope;
mod ids;
mod message;
mod query;

pub use activity::{
    ActivityEvent, ActivityType, ClientUpdate, DocumentUpload, ProjectUpdate, TaskAssignment,
    TaskChanges, TaskStatusChange, TaskSubscription, TaskUpdate,
};
pub use envelope::{Envelope, MessageKind};
pub use ids::{ClientId, DocumentId, MilestoneId, ProjectId, TaskId, UserId};
pub use message::{ChatMessage, MilestoneChange, Notification, SyncMessage};
pub use query::{
    QueryKey, QuerySegment, CLIENTS_PATH, DOCUMENTS_PATH, MESSAGES_PATH, PROJECTS_PATH,
    TASKS_PATH,
};

use thiserror::Error;

/// Errors raised while decoding or encoding a frame.
///
/// Only [`ProtoError::Malformed`] means the frame was not a usable envelope at
/// all; the other variants describe frames that are well formed but that this
/// client does not understand and should ignore.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
    #[error("unknown activity type `{0}`")]
    UnknownActivity(String),
    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode `{kind}` payload: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtoError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, ProtoError::Malformed(_))
    }

    /// Short label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ProtoError::Malformed(_) => "malformed",
            ProtoError::UnknownKind(_) => "unknown_kind",
            ProtoError::UnknownActivity(_) => "unknown_activity",
            ProtoError::InvalidPayload { .. } => "invalid_payload",
            ProtoError::Encode { .. } => "encode",
        }
    }
}

pub type ProtoResult<T> = Result<T, ProtoError>;
