use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use ledgerline_proto::{SyncMessage, UserId};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;

use crate::broadcast::{Broadcaster, MessageSink};
use crate::cache::{Invalidator, QueryCache};
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionPhase, ConnectionSnapshot, Outbound};
use crate::error::SyncError;
use crate::notify::Notifier;
use crate::router::MessageRouter;
use crate::session::{SessionProvider, SessionUser};
use crate::subscription::{SubscriptionGuard, SubscriptionScope, SubscriptionTracker};
use crate::transport::Connector;

/// Hands out one shared connection per signed-in user.
///
/// The first [`acquire`](Self::acquire) for a user opens the connection;
/// dropping the last lease for it tears the connection down.
pub struct ConnectionRegistry {
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    session: Arc<dyn SessionProvider>,
    notifier: Arc<dyn Notifier>,
    cache: Arc<dyn QueryCache>,
    entries: Mutex<HashMap<UserId, Weak<SyncServices>>>,
}

impl ConnectionRegistry {
    pub fn new(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        session: Arc<dyn SessionProvider>,
        notifier: Arc<dyn Notifier>,
        cache: Arc<dyn QueryCache>,
    ) -> Self {
        Self {
            config,
            connector,
            session,
            notifier,
            cache,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `None` while nobody is signed in. Must be called inside a tokio runtime.
    pub fn acquire(&self) -> Option<SyncLease> {
        let user = self.session.current_user()?;
        let mut entries = self.entries.lock();
        entries.retain(|_, services| services.strong_count() > 0);

        if let Some(services) = entries.get(&user.id).and_then(Weak::upgrade) {
            return Some(SyncLease { services });
        }

        let services = Arc::new(self.open(user));
        entries.insert(services.user.id, Arc::downgrade(&services));
        services.manager.connect();
        Some(SyncLease { services })
    }

    pub fn active_connections(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|services| services.strong_count() > 0)
            .count()
    }

    fn open(&self, user: SessionUser) -> SyncServices {
        info!(target: "ledgerline.sync", user = %user.id, "opening shared connection");
        let outbound = Outbound::new(Arc::clone(&self.notifier));
        let sink: Arc<dyn MessageSink> = Arc::new(outbound.clone());
        let invalidator = Invalidator::new(Arc::clone(&self.cache));
        let tracker = Arc::new(SubscriptionTracker::new(user.id, Arc::clone(&sink)));
        let router = MessageRouter::new(
            Arc::clone(&self.session),
            invalidator.clone(),
            Arc::clone(&self.notifier),
        );
        let manager = ConnectionManager::builder(
            self.config.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.session),
            Arc::clone(&self.notifier),
        )
        .outbound(outbound)
        .inbound(Arc::new(router))
        .listener(tracker.clone())
        .spawn();
        let broadcaster = Broadcaster::new(user.id, sink, invalidator, Arc::clone(&self.notifier));

        SyncServices {
            user,
            manager,
            tracker,
            broadcaster,
        }
    }
}

/// Everything bound to one shared connection.
pub struct SyncServices {
    user: SessionUser,
    manager: ConnectionManager,
    tracker: Arc<SubscriptionTracker>,
    broadcaster: Broadcaster,
}

impl Drop for SyncServices {
    fn drop(&mut self) {
        info!(target: "ledgerline.sync", user = %self.user.id, "last lease released");
    }
}

/// A consumer's reference to the shared connection.
#[derive(Clone)]
pub struct SyncLease {
    services: Arc<SyncServices>,
}

impl SyncLease {
    pub fn user(&self) -> &SessionUser {
        &self.services.user
    }

    pub fn send(&self, message: &SyncMessage) -> bool {
        self.services.manager.send(message)
    }

    /// Keeps `scope` subscribed, and the connection alive, until the guard
    /// is dropped.
    pub fn subscribe(&self, scope: SubscriptionScope) -> SubscriptionGuard {
        self.services.tracker.subscribe(scope).holding(self.clone())
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.services.broadcaster
    }

    /// Retries right away, skipping any pending backoff.
    pub fn reconnect(&self) {
        self.services.manager.connect();
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.services.manager.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.services.manager.watch()
    }

    pub async fn wait_until_open(&self, limit: Duration) -> Result<(), SyncError> {
        let mut watch = self.watch();
        let wait = async {
            loop {
                let snapshot = watch.borrow_and_update().clone();
                match snapshot.phase {
                    ConnectionPhase::Open => return Ok(()),
                    ConnectionPhase::Failed => {
                        return Err(SyncError::Failed {
                            attempts: snapshot.reconnect_attempts,
                        })
                    }
                    ConnectionPhase::Closed => return Err(SyncError::Closed),
                    ConnectionPhase::Idle
                    | ConnectionPhase::Connecting
                    | ConnectionPhase::Reconnecting => {}
                }
                if watch.changed().await.is_err() {
                    return Err(SyncError::Closed);
                }
            }
        };
        tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| SyncError::Timeout(limit))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RecordingCache;
    use crate::notify::RecordingNotifier;
    use crate::session::StaticSession;
    use crate::transport::mock::MockConnector;
    use ledgerline_proto::{ProjectId, QueryKey, TaskId};

    fn registry(connector: &MockConnector, session: Arc<StaticSession>) -> ConnectionRegistry {
        ConnectionRegistry::new(
            SyncConfig::default(),
            Arc::new(connector.clone()),
            session,
            Arc::new(RecordingNotifier::new()),
            Arc::new(RecordingCache::new()),
        )
    }

    fn signed_in(id: i64) -> Arc<StaticSession> {
        Arc::new(StaticSession::signed_in(SessionUser::new(UserId(id))))
    }

    #[tokio::test(start_paused = true)]
    async fn leases_for_one_user_share_a_socket() {
        let connector = MockConnector::accepting();
        let registry = registry(&connector, signed_in(1));

        let first = registry.acquire().unwrap();
        let second = registry.acquire().unwrap();
        first.wait_until_open(Duration::from_secs(1)).await.unwrap();

        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(registry.active_connections(), 1);
        assert_eq!(second.snapshot().phase, ConnectionPhase::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn no_lease_without_a_signed_in_user() {
        let connector = MockConnector::accepting();
        let registry = registry(&connector, Arc::new(StaticSession::anonymous()));

        assert!(registry.acquire().is_none());
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_last_holder_tears_down() {
        let connector = MockConnector::accepting();
        let registry = registry(&connector, signed_in(1));

        let lease = registry.acquire().unwrap();
        lease.wait_until_open(Duration::from_secs(1)).await.unwrap();
        let mut peer = connector.accepted().await;
        let guard = lease.subscribe(SubscriptionScope::Tasks { project: None });
        let mut watch = lease.watch();

        drop(lease);
        assert_eq!(registry.active_connections(), 1);
        drop(guard);

        watch
            .wait_for(|s| s.phase == ConnectionPhase::Closed)
            .await
            .unwrap();
        assert_eq!(registry.active_connections(), 0);

        let frames = peer.drain_sent();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"subscribe_tasks\""));
        assert!(frames[1].contains("\"unsubscribe_tasks\""));
        assert_eq!(peer.next_sent().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn subscriptions_are_replayed_after_a_reconnect() {
        let connector = MockConnector::accepting();
        let registry = registry(&connector, signed_in(1));
        let lease = registry.acquire().unwrap();
        let _guard = lease.subscribe(SubscriptionScope::Project(ProjectId(3)));

        let mut first = connector.accepted().await;
        lease.wait_until_open(Duration::from_secs(1)).await.unwrap();
        assert!(first.next_sent().await.unwrap().contains("\"subscribe\""));
        assert!(first.try_next_sent().is_none());

        first.close(1006, "drop");
        let mut second = connector.accepted().await;
        let frame = second.next_sent().await.unwrap();
        assert!(frame.contains("\"subscribe\""));
        assert!(frame.contains("\"projectId\":3"));
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_reach_the_shared_cache() {
        let connector = MockConnector::accepting();
        let cache = RecordingCache::new();
        let registry = ConnectionRegistry::new(
            SyncConfig::default(),
            Arc::new(connector.clone()),
            signed_in(1),
            Arc::new(RecordingNotifier::new()),
            Arc::new(cache.clone()),
        );
        let lease = registry.acquire().unwrap();
        let peer = connector.accepted().await;

        peer.push_frame(r#"{"type":"task_update","payload":{"taskId":7,"changes":{"status":"review"},"updatedBy":2}}"#);
        while cache.count(&QueryKey::task(TaskId(7))) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.count(&QueryKey::tasks()), 1);
        drop(lease);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_open_reports_terminal_failure() {
        let registry = registry(&MockConnector::refusing(), signed_in(1));
        let lease = registry.acquire().unwrap();

        let err = lease
            .wait_until_open(Duration::from_secs(3600))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Failed { attempts: 5 }));
    }
}
