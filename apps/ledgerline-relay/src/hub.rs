use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use ledgerline_proto::{ActivityEvent, ProjectId, TaskSubscription, UserId};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

pub const DEFAULT_CHANNEL_DEPTH: usize = 64;

/// A scope a connection said it cares about. Recorded for debugging only;
/// delivery ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Interest {
    Tasks {
        user_id: UserId,
        project_id: Option<ProjectId>,
    },
    Project {
        user_id: UserId,
        project_id: ProjectId,
    },
}

/// Every live socket on this relay, keyed by connection id.
#[derive(Clone)]
pub struct ConnectionHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    connections: DashMap<Uuid, Arc<ConnectionEntry>>,
    channel_depth: usize,
    total_connections: AtomicU64,
    frames_relayed: AtomicU64,
    frames_rejected: AtomicU64,
}

struct ConnectionEntry {
    sender: mpsc::Sender<Message>,
    has_session: bool,
    interests: Mutex<BTreeSet<Interest>>,
}

pub struct Registration {
    pub connection_id: Uuid,
    pub receiver: mpsc::Receiver<Message>,
    pub active_connections: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastMetrics {
    pub delivered: usize,
    pub bytes: usize,
    pub dropped: usize,
    pub closed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubSnapshot {
    pub active_connections: usize,
    pub total_connections: u64,
    pub frames_relayed: u64,
    pub frames_rejected: u64,
    pub connections: Vec<ConnectionSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub connection_id: Uuid,
    pub has_session: bool,
    pub interests: Vec<Interest>,
}

impl ConnectionHub {
    pub fn new(channel_depth: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                connections: DashMap::new(),
                channel_depth: channel_depth.max(1),
                total_connections: AtomicU64::new(0),
                frames_relayed: AtomicU64::new(0),
                frames_rejected: AtomicU64::new(0),
            }),
        }
    }

    pub fn register(&self, has_session: bool) -> Registration {
        let (tx, rx) = mpsc::channel(self.inner.channel_depth);
        let connection_id = Uuid::new_v4();
        self.inner.connections.insert(
            connection_id,
            Arc::new(ConnectionEntry {
                sender: tx,
                has_session,
                interests: Mutex::new(BTreeSet::new()),
            }),
        );
        self.inner.total_connections.fetch_add(1, Ordering::Relaxed);
        Registration {
            connection_id,
            receiver: rx,
            active_connections: self.inner.connections.len(),
        }
    }

    /// Returns the number of connections left.
    pub fn unregister(&self, connection_id: Uuid) -> usize {
        self.inner.connections.remove(&connection_id);
        self.inner.connections.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Offers `message` to every connection but `source`. Never waits on a
    /// slow reader: a full channel loses the frame, a closed one is evicted.
    pub fn broadcast_except(&self, source: Uuid, message: &Message) -> BroadcastMetrics {
        let targets: Vec<(Uuid, mpsc::Sender<Message>)> = self
            .inner
            .connections
            .iter()
            .filter(|entry| *entry.key() != source)
            .map(|entry| (*entry.key(), entry.value().sender.clone()))
            .collect();

        let mut metrics = BroadcastMetrics::default();
        let bytes = message_len(message);
        for (connection_id, sender) in targets {
            match sender.try_send(message.clone()) {
                Ok(()) => {
                    metrics.delivered += 1;
                    metrics.bytes += bytes;
                }
                Err(TrySendError::Full(_)) => {
                    metrics.dropped += 1;
                    counter!("ledgerline_relay_flow_control_drops_total", 1);
                    tracing::debug!(%connection_id, "outbound buffer full; frame dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    metrics.closed += 1;
                    self.inner.connections.remove(&connection_id);
                }
            }
        }
        self.inner.frames_relayed.fetch_add(1, Ordering::Relaxed);
        metrics
    }

    pub fn record_rejected(&self) {
        self.inner.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Applies a subscribe or unsubscribe activity to the connection's
    /// interest list. Returns whether the list changed.
    pub fn apply_subscription(&self, connection_id: Uuid, event: &ActivityEvent) -> bool {
        let Some(entry) = self
            .inner
            .connections
            .get(&connection_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return false;
        };
        let mut interests = entry.interests.lock();
        match event {
            ActivityEvent::SubscribeTasks(sub) => interests.insert(tasks_interest(sub)),
            ActivityEvent::UnsubscribeTasks(sub) => interests.remove(&tasks_interest(sub)),
            ActivityEvent::Subscribe(sub) => match project_interest(sub) {
                Some(interest) => interests.insert(interest),
                None => false,
            },
            ActivityEvent::Unsubscribe(sub) => match project_interest(sub) {
                Some(interest) => interests.remove(&interest),
                None => false,
            },
            _ => false,
        }
    }

    pub fn snapshot(&self) -> HubSnapshot {
        let mut connections: Vec<ConnectionSnapshot> = self
            .inner
            .connections
            .iter()
            .map(|entry| ConnectionSnapshot {
                connection_id: *entry.key(),
                has_session: entry.value().has_session,
                interests: entry.value().interests.lock().iter().copied().collect(),
            })
            .collect();
        connections.sort_by_key(|c| c.connection_id);

        HubSnapshot {
            active_connections: connections.len(),
            total_connections: self.inner.total_connections.load(Ordering::Relaxed),
            frames_relayed: self.inner.frames_relayed.load(Ordering::Relaxed),
            frames_rejected: self.inner.frames_rejected.load(Ordering::Relaxed),
            connections,
        }
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_DEPTH)
    }
}

fn tasks_interest(sub: &TaskSubscription) -> Interest {
    Interest::Tasks {
        user_id: sub.user_id,
        project_id: sub.project_id,
    }
}

fn project_interest(sub: &TaskSubscription) -> Option<Interest> {
    sub.project_id.map(|project_id| Interest::Project {
        user_id: sub.user_id,
        project_id,
    })
}

fn message_len(message: &Message) -> usize {
    match message {
        Message::Text(text) => text.len(),
        Message::Binary(bytes) => bytes.len(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(body: &str) -> Message {
        Message::Text(body.to_string())
    }

    #[test]
    fn broadcast_skips_the_source() {
        let hub = ConnectionHub::default();
        let mut a = hub.register(true);
        let mut b = hub.register(true);

        let metrics = hub.broadcast_except(a.connection_id, &text("hello"));

        assert_eq!(metrics.delivered, 1);
        assert_eq!(metrics.bytes, 5);
        assert!(matches!(b.receiver.try_recv(), Ok(Message::Text(t)) if t == "hello"));
        assert!(a.receiver.try_recv().is_err());
    }

    #[test]
    fn full_channels_drop_and_closed_channels_are_evicted() {
        let hub = ConnectionHub::new(1);
        let source = hub.register(false);
        let _slow = hub.register(false);
        let gone = hub.register(false);
        drop(gone.receiver);

        let first = hub.broadcast_except(source.connection_id, &text("one"));
        assert_eq!(first.delivered, 1);
        assert_eq!(first.closed, 1);
        assert_eq!(hub.connection_count(), 2);

        let second = hub.broadcast_except(source.connection_id, &text("two"));
        assert_eq!(second.delivered, 0);
        assert_eq!(second.dropped, 1);
        assert_eq!(hub.snapshot().frames_relayed, 2);
    }

    #[test]
    fn subscription_activities_track_interest() {
        let hub = ConnectionHub::default();
        let conn = hub.register(true);
        let sub = TaskSubscription {
            user_id: UserId(4),
            project_id: Some(ProjectId(9)),
        };

        assert!(hub.apply_subscription(conn.connection_id, &ActivityEvent::SubscribeTasks(sub.clone())));
        assert!(!hub.apply_subscription(conn.connection_id, &ActivityEvent::SubscribeTasks(sub.clone())));
        assert!(hub.apply_subscription(conn.connection_id, &ActivityEvent::Subscribe(sub.clone())));

        let snapshot = hub.snapshot();
        assert_eq!(snapshot.connections[0].interests.len(), 2);

        assert!(hub.apply_subscription(conn.connection_id, &ActivityEvent::UnsubscribeTasks(sub)));
        let interests = &hub.snapshot().connections[0].interests;
        assert_eq!(
            interests,
            &vec![Interest::Project {
                user_id: UserId(4),
                project_id: ProjectId(9)
            }]
        );
    }

    #[test]
    fn project_subscribe_without_a_project_is_ignored() {
        let hub = ConnectionHub::default();
        let conn = hub.register(true);
        let sub = TaskSubscription {
            user_id: UserId(4),
            project_id: None,
        };
        assert!(!hub.apply_subscription(conn.connection_id, &ActivityEvent::Subscribe(sub)));
        assert_eq!(hub.unregister(conn.connection_id), 0);
    }
}
