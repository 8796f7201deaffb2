use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use url::Url;

use super::{ConnectRequest, Connector, TransportError, TransportEvent, TransportLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Accept,
    Refuse,
    /// Never completes; only the caller's connect timeout ends the attempt.
    Hang,
}

/// One recorded call to [`MockConnector::connect`].
#[derive(Debug, Clone)]
pub struct MockAttempt {
    pub url: Url,
    pub session_cookie: Option<String>,
    pub attempt: u32,
    pub at: Instant,
}

/// Scripted connector. Each connect takes the next outcome from the script,
/// falling back to a fixed outcome once the script runs out.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    peer_ready: Arc<Notify>,
}

struct MockState {
    script: VecDeque<MockOutcome>,
    fallback: MockOutcome,
    attempts: Vec<MockAttempt>,
    peers: VecDeque<MockPeer>,
}

impl MockConnector {
    pub fn accepting() -> Self {
        Self::with_fallback(MockOutcome::Accept)
    }

    pub fn refusing() -> Self {
        Self::with_fallback(MockOutcome::Refuse)
    }

    pub fn with_fallback(fallback: MockOutcome) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                script: VecDeque::new(),
                fallback,
                attempts: Vec::new(),
                peers: VecDeque::new(),
            })),
            peer_ready: Arc::new(Notify::new()),
        }
    }

    pub fn script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        self.state.lock().script.extend(outcomes);
        self
    }

    pub fn attempts(&self) -> Vec<MockAttempt> {
        self.state.lock().attempts.clone()
    }

    /// Waits for the server side of the next accepted socket.
    pub async fn accepted(&self) -> MockPeer {
        loop {
            if let Some(peer) = self.state.lock().peers.pop_front() {
                return peer;
            }
            self.peer_ready.notified().await;
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, TransportError> {
        let outcome = {
            let mut state = self.state.lock();
            state.attempts.push(MockAttempt {
                url: request.url.clone(),
                session_cookie: request.session_cookie.clone(),
                attempt: request.attempt,
                at: Instant::now(),
            });
            state.script.pop_front().unwrap_or(state.fallback)
        };
        match outcome {
            MockOutcome::Refuse => Err(TransportError::Refused(format!(
                "mock refused attempt {}",
                request.attempt
            ))),
            MockOutcome::Hang => std::future::pending().await,
            MockOutcome::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                self.state.lock().peers.push_back(MockPeer {
                    sent: outbound_rx,
                    events: events_tx,
                });
                self.peer_ready.notify_one();
                Ok(TransportLink {
                    outbound: outbound_tx,
                    events: events_rx,
                })
            }
        }
    }
}

/// Server end of a mock socket.
pub struct MockPeer {
    sent: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockPeer {
    pub fn push_frame(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Frame(text.into()));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Error(message.into()));
    }

    /// Closes the socket from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.events.send(TransportEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
        });
    }

    /// Next frame the client wrote, or `None` once the client closed.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    pub fn try_next_sent(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    /// Every frame written so far.
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// True once the client dropped its end.
    pub fn is_closed_by_client(&self) -> bool {
        self.events.is_closed()
    }
}
