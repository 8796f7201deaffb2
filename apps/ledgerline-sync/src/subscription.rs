use std::collections::BTreeMap;
use std::sync::Arc;

use ledgerline_proto::{ActivityEvent, ProjectId, SyncMessage, TaskSubscription, UserId};
use parking_lot::Mutex;
use tracing::debug;

use crate::broadcast::MessageSink;
use crate::connection::ConnectionListener;
use crate::registry::SyncLease;

/// What a mounted view wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubscriptionScope {
    /// A user's tasks, optionally narrowed to one project.
    Tasks { project: Option<ProjectId> },
    /// Everything about one project.
    Project(ProjectId),
}

impl SubscriptionScope {
    fn subscribe_message(self, user: UserId) -> SyncMessage {
        let event = match self {
            SubscriptionScope::Tasks { project } => ActivityEvent::SubscribeTasks(TaskSubscription {
                user_id: user,
                project_id: project,
            }),
            SubscriptionScope::Project(project) => ActivityEvent::Subscribe(TaskSubscription {
                user_id: user,
                project_id: Some(project),
            }),
        };
        event.into()
    }

    fn unsubscribe_message(self, user: UserId) -> SyncMessage {
        let event = match self {
            SubscriptionScope::Tasks { project } => {
                ActivityEvent::UnsubscribeTasks(TaskSubscription {
                    user_id: user,
                    project_id: project,
                })
            }
            SubscriptionScope::Project(project) => ActivityEvent::Unsubscribe(TaskSubscription {
                user_id: user,
                project_id: Some(project),
            }),
        };
        event.into()
    }
}

/// Advisory server-side interest for one shared connection.
///
/// Scopes are reference counted: the first guard for a scope sends the
/// subscribe activity and the last one dropped sends the unsubscribe. Nothing
/// is sent between a close and the replay that follows the next open, so a
/// scope added while the socket comes up is subscribed exactly once.
pub struct SubscriptionTracker {
    user: UserId,
    sink: Arc<dyn MessageSink>,
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    /// Set by the open replay, cleared on close.
    live: bool,
    scopes: BTreeMap<SubscriptionScope, usize>,
}

impl SubscriptionTracker {
    pub fn new(user: UserId, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            user,
            sink,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn subscribe(self: &Arc<Self>, scope: SubscriptionScope) -> SubscriptionGuard {
        self.retain(scope);
        SubscriptionGuard {
            tracker: Arc::clone(self),
            scope,
            _lease: None,
        }
    }

    pub fn active(&self) -> Vec<SubscriptionScope> {
        self.state.lock().scopes.keys().copied().collect()
    }

    fn retain(&self, scope: SubscriptionScope) {
        let mut state = self.state.lock();
        let live = state.live;
        let count = state.scopes.entry(scope).or_insert(0);
        *count += 1;
        if *count == 1 && live && self.sink.is_open() {
            self.sink.send(&scope.subscribe_message(self.user));
        }
    }

    fn release(&self, scope: SubscriptionScope) {
        let mut state = self.state.lock();
        let live = state.live;
        let Some(count) = state.scopes.get_mut(&scope) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            state.scopes.remove(&scope);
            if live && self.sink.is_open() {
                self.sink.send(&scope.unsubscribe_message(self.user));
            }
        }
    }
}

impl ConnectionListener for SubscriptionTracker {
    /// Re-sends subscribe for every active scope.
    fn on_open(&self) {
        let mut state = self.state.lock();
        state.live = true;
        for scope in state.scopes.keys() {
            self.sink.send(&scope.subscribe_message(self.user));
        }
        if !state.scopes.is_empty() {
            debug!(target: "ledgerline.sync", count = state.scopes.len(), "replayed subscriptions");
        }
    }

    fn on_close(&self) {
        self.state.lock().live = false;
    }
}

/// Keeps a scope subscribed while alive; the view holds it for as long as it
/// is mounted.
pub struct SubscriptionGuard {
    tracker: Arc<SubscriptionTracker>,
    scope: SubscriptionScope,
    _lease: Option<SyncLease>,
}

impl SubscriptionGuard {
    pub(crate) fn holding(mut self, lease: SyncLease) -> Self {
        self._lease = Some(lease);
        self
    }

    pub fn scope(&self) -> SubscriptionScope {
        self.scope
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.tracker.release(self.scope);
    }
}
