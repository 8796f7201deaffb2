//! The connection manager: one logical socket to the push channel.
//!
//! State lives in an actor task. Callers hold a [`ConnectionManager`] handle
//! that sends commands to it, and an [`Outbound`] that writes straight into
//! the live socket so that `send` is synchronous and fails fast.
//!
//! ```text
//! Idle -> Connecting -> Open -> (close) -> Reconnecting -> Connecting -> ...
//!                                       \-> Failed          (ceiling reached)
//! any  -> Closed                                            (teardown)
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use ledgerline_proto::{MessageKind, SyncMessage};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::SyncConfig;
use crate::notify::{titles, Notifier, Severity};
use crate::session::SessionProvider;
use crate::transport::{ConnectRequest, Connector, TransportError, TransportEvent, TransportLink};

const LOG_TARGET: &str = "ledgerline.sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Never connected, or no signed-in user.
    Idle,
    Connecting,
    Open,
    /// Waiting out a backoff delay.
    Reconnecting,
    /// Backoff ceiling reached; only a manual `connect` tries again.
    Failed,
    /// Torn down. Terminal.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub phase: ConnectionPhase,
    pub reconnect_attempts: u32,
    /// Backoff delay of the pending retry, while `Reconnecting`.
    pub retry_in: Option<Duration>,
}

impl ConnectionSnapshot {
    fn idle() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            reconnect_attempts: 0,
            retry_in: None,
        }
    }
}

/// Receives every inbound text frame, in order.
pub trait InboundHandler: Send + Sync + 'static {
    fn handle_frame(&self, text: &str);
}

/// Socket lifecycle callbacks, run on the actor.
pub trait ConnectionListener: Send + Sync + 'static {
    /// After each successful open, before any inbound frame of that socket.
    fn on_open(&self);

    /// After the socket handle is dropped, whether by a close, a failed
    /// connect or teardown.
    fn on_close(&self) {}
}

struct DiscardInbound;

impl InboundHandler for DiscardInbound {
    fn handle_frame(&self, text: &str) {
        trace!(target: LOG_TARGET, len = text.len(), "discarding inbound frame");
    }
}

/// Write side of the live socket.
///
/// Holds the socket handle slot; the slot is filled on open and cleared on
/// close, so at most one socket is ever written to.
#[derive(Clone)]
pub struct Outbound {
    slot: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    notifier: Arc<dyn Notifier>,
}

impl Outbound {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            notifier,
        }
    }

    pub fn is_open(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .is_some_and(|socket| !socket.is_closed())
    }

    /// Transmits one envelope if the socket is open. Otherwise the message is
    /// dropped and a connection error toast is surfaced.
    pub fn send(&self, message: &SyncMessage) -> bool {
        let frame = match message.to_json() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(target: LOG_TARGET, kind = %message.kind(), error = %err, "failed to encode message");
                return false;
            }
        };
        self.send_frame(message.kind(), frame)
    }

    fn send_frame(&self, kind: MessageKind, frame: String) -> bool {
        let sent = match self.slot.lock().as_ref() {
            Some(socket) => socket.send(frame).is_ok(),
            None => false,
        };
        if sent {
            trace!(target: LOG_TARGET, kind = %kind, "frame sent");
        } else {
            warn!(target: LOG_TARGET, kind = %kind, "socket not open; message dropped");
            self.notifier.surface(
                titles::CONNECTION_ERROR,
                "Not connected to the server. Your change was saved but other sessions were not notified.",
                Severity::Error,
            );
        }
        sent
    }

    fn attach(&self, socket: mpsc::UnboundedSender<String>) {
        *self.slot.lock() = Some(socket);
    }

    /// Drops the socket handle, which closes the socket.
    fn detach(&self) {
        self.slot.lock().take();
    }
}

enum Command {
    Connect,
    Shutdown,
}

/// Handle to a running connection actor. Dropping it tears the connection down.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    outbound: Outbound,
    state: watch::Receiver<ConnectionSnapshot>,
}

impl ConnectionManager {
    pub fn builder(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        session: Arc<dyn SessionProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> ConnectionBuilder {
        ConnectionBuilder {
            config,
            connector,
            session,
            outbound: None,
            notifier,
            inbound: Arc::new(DiscardInbound),
            listeners: Vec::new(),
        }
    }

    /// Opens the socket unless it is already open or opening, or nobody is
    /// signed in. Cancels a pending backoff retry.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    pub fn send(&self, message: &SyncMessage) -> bool {
        self.outbound.send(message)
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.state.clone()
    }

    /// Cancels any pending retry and closes the socket. No toast is shown.
    pub fn teardown(&self) {
        self.outbound.detach();
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub struct ConnectionBuilder {
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    session: Arc<dyn SessionProvider>,
    outbound: Option<Outbound>,
    notifier: Arc<dyn Notifier>,
    inbound: Arc<dyn InboundHandler>,
    listeners: Vec<Arc<dyn ConnectionListener>>,
}

impl ConnectionBuilder {
    /// Shares an existing write side, so collaborators built before the
    /// manager can already hold it.
    pub fn outbound(mut self, outbound: Outbound) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn inbound(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.inbound = handler;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Starts the actor. Must be called inside a tokio runtime. The socket is
    /// not opened until [`ConnectionManager::connect`].
    pub fn spawn(self) -> ConnectionManager {
        let outbound = self
            .outbound
            .unwrap_or_else(|| Outbound::new(Arc::clone(&self.notifier)));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionSnapshot::idle());

        let actor = Actor {
            config: self.config,
            connector: self.connector,
            session: self.session,
            notifier: self.notifier,
            inbound: self.inbound,
            listeners: self.listeners,
            outbound: outbound.clone(),
            state: state_tx,
            attempts: 0,
            events: None,
            pending_connect: None,
            retry_at: None,
        };
        tokio::spawn(actor.run(commands_rx));

        ConnectionManager {
            commands: commands_tx,
            outbound,
            state: state_rx,
        }
    }
}

type PendingConnect = BoxFuture<'static, Result<TransportLink, TransportError>>;

struct Actor {
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    session: Arc<dyn SessionProvider>,
    notifier: Arc<dyn Notifier>,
    inbound: Arc<dyn InboundHandler>,
    listeners: Vec<Arc<dyn ConnectionListener>>,
    outbound: Outbound,
    state: watch::Sender<ConnectionSnapshot>,
    attempts: u32,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    pending_connect: Option<PendingConnect>,
    retry_at: Option<Instant>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Shutdown) | None => {
                        self.teardown();
                        return;
                    }
                },
                result = wait_connect(&mut self.pending_connect) => {
                    self.pending_connect = None;
                    self.finish_connect(result);
                }
                event = next_event(&mut self.events) => self.handle_event(event),
                _ = wait_retry(self.retry_at) => {
                    self.retry_at = None;
                    self.attempts += 1;
                    self.connect();
                }
            }
        }
    }

    fn connect(&mut self) {
        if self.events.is_some() || self.pending_connect.is_some() {
            trace!(target: LOG_TARGET, "connect ignored; socket already open or opening");
            return;
        }
        let Some(user) = self.session.current_user() else {
            debug!(target: LOG_TARGET, "connect ignored; no signed-in user");
            self.retry_at = None;
            self.publish(ConnectionPhase::Idle, None);
            return;
        };
        if self.retry_at.take().is_some() {
            debug!(target: LOG_TARGET, attempt = self.attempts, "manual connect cancelled pending retry");
        }

        let request = ConnectRequest {
            url: self.config.socket_url(),
            session_cookie: self.config.session_cookie.clone(),
            attempt: self.attempts,
        };
        info!(
            target: LOG_TARGET,
            url = %request.url,
            attempt = request.attempt,
            user = %user.id,
            "connecting"
        );

        let connector = Arc::clone(&self.connector);
        let limit = self.config.connect_timeout;
        self.pending_connect = Some(Box::pin(async move {
            match tokio::time::timeout(limit, connector.connect(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(limit)),
            }
        }));
        self.publish(ConnectionPhase::Connecting, None);
    }

    fn finish_connect(&mut self, result: Result<TransportLink, TransportError>) {
        match result {
            Ok(link) => {
                self.outbound.attach(link.outbound);
                self.events = Some(link.events);
                self.attempts = 0;
                info!(target: LOG_TARGET, "connected");
                self.publish(ConnectionPhase::Open, None);
                for listener in &self.listeners {
                    listener.on_open();
                }
            }
            Err(err) => {
                // a socket that never opens reports an error, then a close
                self.on_error(&err.to_string());
                self.on_close(None, "connect failed");
            }
        }
    }

    fn handle_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Frame(text)) => self.inbound.handle_frame(&text),
            Some(TransportEvent::Error(message)) => self.on_error(&message),
            Some(TransportEvent::Closed { code, reason }) => self.on_close(code, &reason),
            None => self.on_close(None, "transport ended"),
        }
    }

    fn on_error(&self, message: &str) {
        warn!(target: LOG_TARGET, error = message, attempt = self.attempts, "socket error");
        self.notifier.surface(
            titles::CONNECTION_ERROR,
            "Lost connection to the server.",
            Severity::Error,
        );
    }

    fn on_close(&mut self, code: Option<u16>, reason: &str) {
        self.detach();

        if self.config.should_reconnect(self.attempts) {
            let delay = self.config.reconnect_delay(self.attempts);
            self.retry_at = Some(Instant::now() + delay);
            info!(
                target: LOG_TARGET,
                ?code,
                reason,
                attempt = self.attempts + 1,
                delay_ms = delay.as_millis() as u64,
                "socket closed; scheduling reconnect"
            );
            self.notifier.surface(
                titles::RECONNECTING,
                &format!("Attempting to reconnect in {} seconds.", delay.as_secs()),
                Severity::Warning,
            );
            self.publish(ConnectionPhase::Reconnecting, Some(delay));
        } else {
            warn!(
                target: LOG_TARGET,
                ?code,
                reason,
                attempts = self.attempts,
                "socket closed; reconnect attempts exhausted"
            );
            self.notifier.surface(
                titles::CONNECTION_FAILED,
                "Unable to reach the server. Please refresh the page.",
                Severity::Error,
            );
            self.publish(ConnectionPhase::Failed, None);
        }
    }

    fn teardown(&mut self) {
        self.retry_at = None;
        self.pending_connect = None;
        self.detach();
        info!(target: LOG_TARGET, "connection torn down");
        self.publish(ConnectionPhase::Closed, None);
    }

    fn detach(&mut self) {
        self.outbound.detach();
        self.events = None;
        for listener in &self.listeners {
            listener.on_close();
        }
    }

    fn publish(&self, phase: ConnectionPhase, retry_in: Option<Duration>) {
        self.state.send_replace(ConnectionSnapshot {
            phase,
            reconnect_attempts: self.attempts,
            retry_in,
        });
    }
}

async fn wait_connect(pending: &mut Option<PendingConnect>) -> Result<TransportLink, TransportError> {
    match pending {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_retry(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
