use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

/// Toast titles surfaced by the sync layer.
pub mod titles {
    pub const CONNECTION_ERROR: &str = "Connection error";
    pub const RECONNECTING: &str = "Reconnecting";
    pub const CONNECTION_FAILED: &str = "Connection failed";
    pub const NEW_MESSAGE: &str = "New message";
    pub const NEW_TASK_ASSIGNMENT: &str = "New task assignment";
    pub const TASK_STATUS_UPDATED: &str = "Task status updated";
    pub const MILESTONE_CREATED: &str = "Milestone created";
    pub const MILESTONE_UPDATED: &str = "Milestone updated";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// The toast surface of the host UI.
pub trait Notifier: Send + Sync + 'static {
    fn surface(&self, title: &str, body: &str, severity: Severity);
}

/// Headless notifier: toasts become log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn surface(&self, title: &str, body: &str, severity: Severity) {
        match severity {
            Severity::Error => error!(target: "ledgerline.toast", title, body, "toast"),
            Severity::Warning => warn!(target: "ledgerline.toast", title, body, "toast"),
            Severity::Info | Severity::Success => info!(target: "ledgerline.toast", title, body, "toast"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

/// Notifier that keeps every toast, for tests and diagnostics.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    toasts: Arc<Mutex<Vec<Toast>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().clone()
    }

    pub fn count(&self, title: &str) -> usize {
        self.toasts
            .lock()
            .iter()
            .filter(|toast| toast.title == title)
            .count()
    }

    pub fn last(&self) -> Option<Toast> {
        self.toasts.lock().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn surface(&self, title: &str, body: &str, severity: Severity) {
        self.toasts.lock().push(Toast {
            title: title.to_string(),
            body: body.to_string(),
            severity,
        });
    }
}
