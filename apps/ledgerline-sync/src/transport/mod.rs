use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

pub mod mock;
pub mod websocket;

pub use websocket::WebSocketConnector;

/// Something that happened on an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: Url,
    /// Sent as the `Cookie` header; the socket's only authentication.
    pub session_cookie: Option<String>,
    /// Reconnect attempt this connect belongs to, 0 for the first.
    pub attempt: u32,
}

/// An open socket, split into an outbound queue and an event stream.
///
/// Dropping `outbound` closes the socket. When `events` ends without a
/// [`TransportEvent::Closed`] the socket is gone all the same.
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid connect request: {0}")]
    InvalidRequest(String),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection refused: {0}")]
    Refused(String),
}

/// Opens sockets to the push channel. Resolving `Ok` means the socket is open.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, TransportError>;
}
