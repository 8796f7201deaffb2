use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ledgerline_relay::{Interest, RelayConfig, RelayState};
use ledgerline_proto::UserId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

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

async fn connect(addr: SocketAddr, cookie: Option<&str>) -> Client {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    if let Some(cookie) = cookie {
        request
            .headers_mut()
            .insert("Cookie", HeaderValue::from_str(cookie).unwrap());
    }
    let (socket, _) = timeout(LIMIT, connect_async(request)).await.unwrap().unwrap();
    socket
}

async fn wait_for_connections(state: &RelayState, expected: usize) {
    timeout(LIMIT, async {
        while state.hub().connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay never reached the expected connection count");
}

async fn next_text(client: &mut Client) -> String {
    timeout(LIMIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no frame arrived")
}

async fn send(client: &mut Client, text: &str) {
    client.send(Message::Text(text.to_string())).await.unwrap();
}

#[tokio::test]
async fn frames_reach_every_other_client() {
    let (addr, state) = start_relay().await;
    let mut a = connect(addr, Some("sid=a")).await;
    let mut b = connect(addr, Some("sid=b")).await;
    let mut c = connect(addr, None).await;
    wait_for_connections(&state, 3).await;

    let frame = r#"{"type":"chat","payload":{"senderId":1,"content":"hi"}}"#;
    send(&mut a, frame).await;

    assert_eq!(next_text(&mut b).await, frame);
    assert_eq!(next_text(&mut c).await, frame);
    assert!(timeout(Duration::from_millis(200), a.next()).await.is_err());

    let snapshot = state.hub().snapshot();
    assert_eq!(snapshot.frames_relayed, 1);
    assert_eq!(
        snapshot
            .connections
            .iter()
            .filter(|c| c.has_session)
            .count(),
        2
    );
}

#[tokio::test]
async fn malformed_frames_are_never_relayed() {
    let (addr, state) = start_relay().await;
    let mut a = connect(addr, None).await;
    let mut b = connect(addr, None).await;
    wait_for_connections(&state, 2).await;

    send(&mut a, "{not json").await;
    send(&mut a, r#"{"payload":{}}"#).await;
    let valid = r#"{"type":"notification","payload":{"title":"Filed","message":"Return filed"}}"#;
    send(&mut a, valid).await;

    assert_eq!(next_text(&mut b).await, valid);
    assert_eq!(state.hub().snapshot().frames_rejected, 2);
}

#[tokio::test]
async fn subscriptions_record_interest_without_relaying() {
    let (addr, state) = start_relay().await;
    let mut a = connect(addr, Some("sid=a")).await;
    let mut b = connect(addr, None).await;
    wait_for_connections(&state, 2).await;

    send(
        &mut a,
        r#"{"type":"activity","payload":{"activityType":"subscribe_tasks","userId":4}}"#,
    )
    .await;
    let update = r#"{"type":"activity","payload":{"activityType":"task_update","taskId":7,"changes":{},"updatedBy":4}}"#;
    send(&mut a, update).await;

    assert_eq!(next_text(&mut b).await, update);
    let snapshot = state.hub().snapshot();
    let interests: Vec<Interest> = snapshot
        .connections
        .iter()
        .flat_map(|c| c.interests.clone())
        .collect();
    assert_eq!(
        interests,
        vec![Interest::Tasks {
            user_id: UserId(4),
            project_id: None
        }]
    );
}

#[tokio::test]
async fn closed_clients_leave_the_hub() {
    let (addr, state) = start_relay().await;
    let mut a = connect(addr, None).await;
    let b = connect(addr, None).await;
    wait_for_connections(&state, 2).await;

    drop(b);
    wait_for_connections(&state, 1).await;

    send(&mut a, r#"{"type":"chat","payload":{"senderId":1}}"#).await;
    assert_eq!(state.hub().snapshot().total_connections, 2);
}

#[tokio::test]
async fn healthz_reports_ok() {
    let (addr, _state) = start_relay().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    timeout(LIMIT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#"{"status":"ok"}"#));
}
