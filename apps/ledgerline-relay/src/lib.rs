//! Single-node relay for the portal's push channel.
//!
//! Every text frame a client sends is offered to every other connected
//! client. The relay keeps nothing: a client that is offline when a frame
//! passes through never sees it and catches up over REST instead.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::debug;

pub mod hub;
pub mod telemetry;
pub mod ws;

pub use hub::{BroadcastMetrics, ConnectionHub, HubSnapshot, Interest};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_SESSION_COOKIE: &str = "sid";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    /// Cookie name to look for on upgrade. Presence is logged, never checked.
    pub session_cookie: String,
    pub channel_depth: usize,
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            channel_depth: hub::DEFAULT_CHANNEL_DEPTH,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    hub: ConnectionHub,
    session_cookie: String,
    metrics: Option<PrometheusHandle>,
}

impl RelayState {
    pub fn new(config: &RelayConfig, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                hub: ConnectionHub::new(config.channel_depth),
                session_cookie: config.session_cookie.clone(),
                metrics,
            }),
        }
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.inner.hub
    }
}

pub fn app(state: RelayState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/debug/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serves until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: RelayState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn stats_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(state.hub().snapshot())
}

async fn metrics_handler(State(state): State<RelayState>) -> impl IntoResponse {
    match &state.inner.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn ws_handler(
    State(state): State<RelayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let has_session = ws::session_cookie(&headers, &state.inner.session_cookie).is_some();
    if !has_session {
        debug!(cookie = %state.inner.session_cookie, "upgrade without a session cookie");
    }
    ws.on_upgrade(move |socket| ws::handle_connection(socket, state, has_session))
}
