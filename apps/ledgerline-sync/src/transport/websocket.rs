use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::{ConnectRequest, Connector, TransportError, TransportEvent, TransportLink};

/// WebSocket implementation of [`Connector`]
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, TransportError> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
        if let Some(cookie) = &request.session_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;
            ws_request.headers_mut().insert(COOKIE, value);
        }

        let (ws_stream, _) = connect_async(ws_request)
            .await
            .map_err(|err| TransportError::Handshake(err.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(handle_websocket(ws_stream, outbound_rx, events_tx));

        Ok(TransportLink {
            outbound: outbound_tx,
            events: events_rx,
        })
    }
}

/// Pumps one socket until either side closes it.
async fn handle_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(err) = ws_sender.send(Message::Text(text)).await {
                        let _ = events.send(TransportEvent::Error(err.to_string()));
                        let _ = events.send(TransportEvent::Closed { code: None, reason: String::new() });
                        return;
                    }
                }
                None => {
                    // local teardown; nobody is listening for events any more
                    let _ = ws_sender.send(Message::Close(None)).await;
                    let _ = ws_sender.close().await;
                    debug!(target: "ledgerline.transport", "websocket closed locally");
                    return;
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Frame(text)).is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if events.send(TransportEvent::Frame(text)).is_err() {
                            return;
                        }
                    }
                    Err(_) => debug!(target: "ledgerline.transport", "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    let _ = events.send(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => trace!(target: "ledgerline.transport", "control frame"),
                Some(Err(err)) => {
                    let _ = events.send(TransportEvent::Error(err.to_string()));
                    let _ = events.send(TransportEvent::Closed { code: None, reason: String::new() });
                    return;
                }
                None => {
                    let _ = events.send(TransportEvent::Closed { code: None, reason: String::new() });
                    return;
                }
            }
        }
    }
}
