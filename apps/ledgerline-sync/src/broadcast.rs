use std::sync::Arc;

use ledgerline_proto::{
    ActivityEvent, MilestoneChange, ProjectId, SyncMessage, TaskAssignment, TaskChanges,
    TaskId, TaskStatusChange, TaskUpdate, UserId,
};

use crate::cache::Invalidator;
use crate::connection::Outbound;
use crate::notify::{titles, Notifier, Severity};

/// Where outbound messages go. Sends never block and never queue.
pub trait MessageSink: Send + Sync + 'static {
    fn is_open(&self) -> bool;
    /// Returns `false` when the message was dropped.
    fn send(&self, message: &SyncMessage) -> bool;
}

impl MessageSink for Outbound {
    fn is_open(&self) -> bool {
        Outbound::is_open(self)
    }

    fn send(&self, message: &SyncMessage) -> bool {
        Outbound::send(self, message)
    }
}

/// Tells other sessions about a mutation that just succeeded over REST.
///
/// Every broadcast also marks the affected queries stale in this session, so
/// the local view refreshes without waiting for an echo from the server. The
/// returned flag only says whether the frame left; REST stays the source of
/// truth either way.
#[derive(Clone)]
pub struct Broadcaster {
    actor: UserId,
    sink: Arc<dyn MessageSink>,
    invalidator: Invalidator,
    notifier: Arc<dyn Notifier>,
}

impl Broadcaster {
    pub fn new(
        actor: UserId,
        sink: Arc<dyn MessageSink>,
        invalidator: Invalidator,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            actor,
            sink,
            invalidator,
            notifier,
        }
    }

    pub fn task_updated(
        &self,
        task: TaskId,
        changes: TaskChanges,
        project: Option<ProjectId>,
    ) -> bool {
        let event = ActivityEvent::TaskUpdate(TaskUpdate {
            task_id: task,
            changes,
            updated_by: self.actor,
            project_id: project,
        });
        let sent = self.sink.send(&event.into());
        self.invalidator.task_changed(task, project);
        sent
    }

    pub fn task_assigned(&self, task: TaskId, assignee: UserId, project: Option<ProjectId>) -> bool {
        let event = ActivityEvent::TaskAssignment(TaskAssignment {
            task_id: task,
            assigned_to: assignee,
            assigned_by: self.actor,
            project_id: project,
        });
        let sent = self.sink.send(&event.into());
        self.invalidator.task_changed(task, project);
        sent
    }

    pub fn task_status_changed(
        &self,
        task: TaskId,
        status: &str,
        project: Option<ProjectId>,
    ) -> bool {
        let event = ActivityEvent::TaskStatusChange(TaskStatusChange {
            task_id: task,
            status: status.to_string(),
            updated_by: self.actor,
            project_id: project,
        });
        let sent = self.sink.send(&event.into());
        self.invalidator.task_changed(task, project);
        self.notifier.surface(
            titles::TASK_STATUS_UPDATED,
            &format!("Task status changed to \"{status}\"."),
            Severity::Success,
        );
        sent
    }

    pub fn milestone_created(&self, change: MilestoneChange) -> bool {
        let project = change.project_id;
        let sent = self.sink.send(&SyncMessage::MilestoneCreated(change));
        self.invalidator.milestone_changed(project);
        sent
    }

    pub fn milestone_updated(&self, change: MilestoneChange) -> bool {
        let project = change.project_id;
        let sent = self.sink.send(&SyncMessage::MilestoneUpdated(change));
        self.invalidator.milestone_changed(project);
        sent
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::RecordingCache;
    use crate::notify::RecordingNotifier;
    use ledgerline_proto::QueryKey;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    /// Sink that records what it was asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) open: Mutex<bool>,
        pub(crate) sent: Mutex<Vec<Value>>,
    }

    impl RecordingSink {
        pub(crate) fn open() -> Arc<Self> {
            let sink = Self::default();
            *sink.open.lock() = true;
            Arc::new(sink)
        }

        pub(crate) fn frames(&self) -> Vec<Value> {
            self.sent.lock().clone()
        }
    }

    impl MessageSink for RecordingSink {
        fn is_open(&self) -> bool {
            *self.open.lock()
        }

        fn send(&self, message: &SyncMessage) -> bool {
            if !self.is_open() {
                return false;
            }
            let frame = serde_json::from_str(&message.to_json().unwrap()).unwrap();
            self.sent.lock().push(frame);
            true
        }
    }

    fn broadcaster(sink: Arc<RecordingSink>) -> (Broadcaster, RecordingCache, RecordingNotifier) {
        let cache = RecordingCache::new();
        let notifier = RecordingNotifier::new();
        let broadcaster = Broadcaster::new(
            UserId(3),
            sink,
            Invalidator::new(Arc::new(cache.clone())),
            Arc::new(notifier.clone()),
        );
        (broadcaster, cache, notifier)
    }

    #[test]
    fn status_change_invalidates_each_query_once_and_toasts_once() {
        let sink = RecordingSink::open();
        let (broadcaster, cache, notifier) = broadcaster(sink.clone());

        assert!(broadcaster.task_status_changed(TaskId(7), "completed", None));

        assert_eq!(cache.count(&QueryKey::tasks()), 1);
        assert_eq!(cache.count(&QueryKey::task(TaskId(7))), 1);
        assert_eq!(cache.calls().len(), 2);
        assert_eq!(notifier.count(titles::TASK_STATUS_UPDATED), 1);
        assert!(notifier.last().unwrap().body.contains("completed"));
        assert_eq!(
            sink.frames(),
            vec![json!({
                "type": "activity",
                "payload": {
                    "activityType": "task_status_change",
                    "taskId": 7,
                    "status": "completed",
                    "updatedBy": 3
                }
            })]
        );
    }

    #[test]
    fn task_update_sends_only_changed_fields() {
        let sink = RecordingSink::open();
        let (broadcaster, cache, notifier) = broadcaster(sink.clone());
        let changes = TaskChanges {
            assignee_id: Some(UserId(8)),
            hours: Some(1.5),
            ..TaskChanges::default()
        };

        broadcaster.task_updated(TaskId(12), changes, Some(ProjectId(4)));

        let frame = &sink.frames()[0];
        assert_eq!(frame["payload"]["changes"], json!({"assigneeId": 8, "hours": 1.5}));
        assert_eq!(frame["payload"]["updatedBy"], 3);
        assert_eq!(cache.count(&QueryKey::project(ProjectId(4))), 1);
        assert!(notifier.toasts().is_empty());
    }

    #[test]
    fn assignment_carries_assignee_and_actor() {
        let sink = RecordingSink::open();
        let (broadcaster, _, _) = broadcaster(sink.clone());

        broadcaster.task_assigned(TaskId(5), UserId(9), None);

        let payload = &sink.frames()[0]["payload"];
        assert_eq!(payload["activityType"], "task_assignment");
        assert_eq!(payload["assignedTo"], 9);
        assert_eq!(payload["assignedBy"], 3);
    }

    #[test]
    fn local_views_refresh_even_when_the_send_is_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let (broadcaster, cache, _) = broadcaster(sink.clone());

        assert!(!broadcaster.task_assigned(TaskId(5), UserId(9), None));

        assert!(sink.frames().is_empty());
        assert_eq!(cache.count(&QueryKey::task(TaskId(5))), 1);
    }

    #[test]
    fn milestone_broadcast_uses_top_level_kind() {
        let sink = RecordingSink::open();
        let (broadcaster, cache, _) = broadcaster(sink.clone());

        broadcaster.milestone_created(MilestoneChange {
            project_id: ProjectId(2),
            milestone_id: None,
            title: Some("Planning".into()),
            status: "pending".into(),
        });

        assert_eq!(sink.frames()[0]["type"], "milestone_created");
        assert_eq!(cache.count(&QueryKey::project_milestones(ProjectId(2))), 1);
    }
}
