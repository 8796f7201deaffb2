use std::sync::Arc;

use ledgerline_proto::{
    ActivityEvent, ChatMessage, Envelope, MilestoneChange, Notification, SyncMessage, UserId,
};
use tracing::{debug, trace, warn};

use crate::cache::Invalidator;
use crate::connection::InboundHandler;
use crate::notify::{titles, Notifier, Severity};
use crate::session::SessionProvider;

const LOG_TARGET: &str = "ledgerline.sync";

/// Dispatch table from inbound message kind to its effect.
///
/// Identity fields in payloads (`senderId`, `assignedBy`, ...) only decide
/// which toasts to show. They are never treated as proof of who acted.
pub struct MessageRouter {
    session: Arc<dyn SessionProvider>,
    invalidator: Invalidator,
    notifier: Arc<dyn Notifier>,
}

impl MessageRouter {
    pub fn new(
        session: Arc<dyn SessionProvider>,
        invalidator: Invalidator,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            session,
            invalidator,
            notifier,
        }
    }

    pub fn route(&self, message: SyncMessage) {
        trace!(target: LOG_TARGET, kind = %message.kind(), "routing message");
        match message {
            SyncMessage::Notification(notification) => self.on_notification(&notification),
            SyncMessage::Chat(chat) => self.on_chat(&chat),
            SyncMessage::Activity(event) => self.on_activity(event),
            SyncMessage::MilestoneCreated(change) => {
                self.on_milestone(&change, titles::MILESTONE_CREATED)
            }
            SyncMessage::MilestoneUpdated(change) => {
                self.on_milestone(&change, titles::MILESTONE_UPDATED)
            }
        }
    }

    fn current_user(&self) -> Option<UserId> {
        self.session.current_user().map(|user| user.id)
    }

    fn on_notification(&self, notification: &Notification) {
        let severity = if notification.is_error() {
            Severity::Error
        } else {
            Severity::Info
        };
        self.notifier
            .surface(&notification.title, &notification.message, severity);
    }

    fn on_chat(&self, chat: &ChatMessage) {
        self.invalidator.chat_received();
        if self.current_user() == Some(chat.sender_id) {
            return;
        }
        let body = match (&chat.sender_name, &chat.content) {
            (Some(name), Some(content)) => format!("{name}: {content}"),
            (None, Some(content)) => content.clone(),
            (Some(name), None) => format!("{name} sent you a message"),
            (None, None) => "You have a new message".to_string(),
        };
        self.notifier.surface(titles::NEW_MESSAGE, &body, Severity::Info);
    }

    fn on_activity(&self, event: ActivityEvent) {
        match event {
            ActivityEvent::ProjectUpdate(update) => {
                self.invalidator.project_changed(update.project_id)
            }
            ActivityEvent::DocumentUpload(upload) => {
                self.invalidator.document_uploaded(upload.project_id)
            }
            ActivityEvent::ClientUpdate(update) => self.invalidator.client_changed(update.client_id),
            ActivityEvent::TaskUpdate(update) => {
                self.invalidator.task_changed(update.task_id, update.project_id)
            }
            ActivityEvent::TaskStatusChange(change) => {
                self.invalidator.task_changed(change.task_id, change.project_id)
            }
            ActivityEvent::TaskAssignment(assignment) => {
                self.invalidator
                    .task_changed(assignment.task_id, assignment.project_id);
                let me = self.current_user();
                if me == Some(assignment.assigned_to) && me != Some(assignment.assigned_by) {
                    self.notifier.surface(
                        titles::NEW_TASK_ASSIGNMENT,
                        &format!("Task #{} has been assigned to you.", assignment.task_id),
                        Severity::Info,
                    );
                }
            }
            event @ (ActivityEvent::SubscribeTasks(_)
            | ActivityEvent::UnsubscribeTasks(_)
            | ActivityEvent::Subscribe(_)
            | ActivityEvent::Unsubscribe(_)) => {
                debug!(
                    target: LOG_TARGET,
                    activity = %event.activity_type(),
                    "ignoring inbound subscription activity"
                );
            }
        }
    }

    fn on_milestone(&self, change: &MilestoneChange, title: &str) {
        self.invalidator.milestone_changed(change.project_id);
        let body = match &change.title {
            Some(name) => format!("{name} is now {}", change.status),
            None => format!("Milestone status: {}", change.status),
        };
        self.notifier.surface(title, &body, Severity::Info);
    }
}

impl InboundHandler for MessageRouter {
    fn handle_frame(&self, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: LOG_TARGET, error = %err, "dropping malformed frame");
                return;
            }
        };
        let kind = envelope.kind.clone();
        match SyncMessage::from_envelope(envelope) {
            Ok(message) => self.route(message),
            Err(err) => debug!(
                target: LOG_TARGET,
                kind = %kind,
                reason = err.label(),
                error = %err,
                "ignoring frame"
            ),
        }
    }
}
