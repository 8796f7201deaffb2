use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ledgerline_proto::{ChatMessage, ProjectId, QueryKey, SyncMessage, TaskId, UserId};
use ledgerline_relay::{RelayConfig, RelayState};
use ledgerline_sync::cache::RecordingCache;
use ledgerline_sync::notify::{titles, RecordingNotifier};
use ledgerline_sync::transport::WebSocketConnector;
use ledgerline_sync::{
    ConnectionRegistry, QueryCache, QueryStore, SessionUser, StaticSession, SyncConfig, SyncLease,
};
use tokio::net::TcpListener;
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(5);

async fn start_relay() -> (SocketAddr, RelayState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = RelayState::new(&RelayConfig::default(), None);
    tokio::spawn(ledgerline_relay::serve(
        listener,
        state.clone(),
        std::future::pending(),
    ));
    (addr, state)
}

fn registry(
    addr: SocketAddr,
    user: i64,
    cache: Arc<dyn QueryCache>,
    notifier: &RecordingNotifier,
) -> ConnectionRegistry {
    let config = SyncConfig::default()
        .with_origin(&format!("http://{addr}"))
        .unwrap()
        .with_session_cookie(format!("sid=user-{user}"));
    ConnectionRegistry::new(
        config,
        Arc::new(WebSocketConnector),
        Arc::new(StaticSession::signed_in(
            SessionUser::new(UserId(user)).with_name(format!("User {user}")),
        )),
        Arc::new(notifier.clone()),
        cache,
    )
}

async fn open(registry: &ConnectionRegistry) -> SyncLease {
    let lease = registry.acquire().expect("user is signed in");
    lease.wait_until_open(LIMIT).await.unwrap();
    lease
}

async fn wait_for_connections(state: &RelayState, expected: usize) {
    timeout(LIMIT, async {
        while state.hub().connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay never saw both sessions");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_change_in_one_session_invalidates_the_other() {
    let (addr, relay) = start_relay().await;
    let cache_a = RecordingCache::new();
    let cache_b = RecordingCache::new();
    let notifier_a = RecordingNotifier::new();
    let notifier_b = RecordingNotifier::new();
    let registry_a = registry(addr, 1, Arc::new(cache_a.clone()), &notifier_a);
    let registry_b = registry(addr, 2, Arc::new(cache_b.clone()), &notifier_b);

    let a = open(&registry_a).await;
    let _b = open(&registry_b).await;
    wait_for_connections(&relay, 2).await;

    assert!(a
        .broadcaster()
        .task_status_changed(TaskId(7), "completed", Some(ProjectId(3))));

    timeout(LIMIT, async {
        while cache_b.count(&QueryKey::project(ProjectId(3))) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second session never heard about the change");

    assert_eq!(cache_b.count(&QueryKey::tasks()), 1);
    assert_eq!(cache_b.count(&QueryKey::task(TaskId(7))), 1);
    assert_eq!(notifier_b.count(titles::TASK_STATUS_UPDATED), 0);
    assert_eq!(notifier_a.count(titles::TASK_STATUS_UPDATED), 1);
    assert_eq!(cache_a.count(&QueryKey::task(TaskId(7))), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_reaches_the_other_session_as_a_toast_and_stale_messages() {
    let (addr, relay) = start_relay().await;
    let store = Arc::new(QueryStore::new());
    store.record_fetch(QueryKey::messages());
    let mut stale = store.subscribe();
    let notifier_a = RecordingNotifier::new();
    let notifier_b = RecordingNotifier::new();
    let registry_a = registry(addr, 1, Arc::new(RecordingCache::new()), &notifier_a);
    let registry_b = registry(addr, 2, store.clone(), &notifier_b);

    let a = open(&registry_a).await;
    let _b = open(&registry_b).await;
    wait_for_connections(&relay, 2).await;

    assert!(a.send(&SyncMessage::Chat(ChatMessage {
        sender_id: UserId(1),
        sender_name: Some("User 1".into()),
        content: Some("Engagement letter signed".into()),
        project_id: None,
        client_id: None,
    })));

    let key = timeout(LIMIT, stale.recv()).await.unwrap().unwrap();
    assert_eq!(key, QueryKey::messages());
    assert!(store.needs_fetch(&QueryKey::messages()));

    timeout(LIMIT, async {
        while notifier_b.count(titles::NEW_MESSAGE) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no chat toast");
    let toast = notifier_b.last().unwrap();
    assert_eq!(toast.title, titles::NEW_MESSAGE);
    assert_eq!(toast.body, "User 1: Engagement letter signed");
    assert_eq!(notifier_a.count(titles::NEW_MESSAGE), 0);
}
