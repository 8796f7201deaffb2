use axum::extract::ws::{Message, WebSocket};
use axum::http::{header, HeaderMap};
use futures_util::{SinkExt, StreamExt};
use ledgerline_proto::{ActivityEvent, Envelope, ProtoError, SyncMessage};
use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use crate::RelayState;

/// What the relay does with one inbound text frame.
#[derive(Debug)]
pub enum FrameAction {
    Relay,
    /// Updates the sender's interest list; never relayed.
    Subscription(ActivityEvent),
    Reject(ProtoError),
}

/// Only unusable envelopes are rejected. Well-formed frames of kinds this
/// build does not know are relayed so newer clients can talk to each other.
pub fn classify(text: &str) -> FrameAction {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(err) => return FrameAction::Reject(err),
    };
    match SyncMessage::from_envelope(envelope) {
        Ok(SyncMessage::Activity(event)) if event.activity_type().is_subscription() => {
            FrameAction::Subscription(event)
        }
        _ => FrameAction::Relay,
    }
}

/// Finds `name` in the request's `Cookie` headers.
pub fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) async fn handle_connection(socket: WebSocket, state: RelayState, has_session: bool) {
    let hub = state.hub().clone();
    let registration = hub.register(has_session);
    let connection_id = registration.connection_id;
    let mut rx = registration.receiver;
    gauge!(
        "ledgerline_relay_connections_active",
        registration.active_connections as f64
    );
    counter!("ledgerline_relay_connections_total", 1);
    info!(%connection_id, has_session, "connection established");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
        debug!(%connection_id, "writer task finished");
    });

    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    reject(&state, connection_id, "binary");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                info!(
                    %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(%connection_id, error = %err, "error receiving message");
                break;
            }
        };

        match classify(&text) {
            FrameAction::Relay => {
                let metrics = hub.broadcast_except(connection_id, &Message::Text(text));
                if metrics.delivered > 0 {
                    counter!(
                        "ledgerline_relay_frames_delivered_total",
                        metrics.delivered as u64
                    );
                    counter!(
                        "ledgerline_relay_bytes_delivered_total",
                        metrics.bytes as u64
                    );
                }
            }
            FrameAction::Subscription(event) => {
                let changed = hub.apply_subscription(connection_id, &event);
                debug!(
                    %connection_id,
                    activity = %event.activity_type(),
                    changed,
                    "interest updated"
                );
            }
            FrameAction::Reject(err) => {
                debug!(%connection_id, error = %err, "frame rejected");
                reject(&state, connection_id, err.label());
            }
        }
    }

    let remaining = hub.unregister(connection_id);
    gauge!("ledgerline_relay_connections_active", remaining as f64);
    counter!("ledgerline_relay_connections_closed_total", 1);
    writer.abort();
    info!(%connection_id, "connection closed");
}

fn reject(state: &RelayState, connection_id: uuid::Uuid, reason: &'static str) {
    state.hub().record_rejected();
    counter!("ledgerline_relay_frames_rejected_total", 1, "reason" => reason);
    warn!(%connection_id, reason, "dropping frame");
}
