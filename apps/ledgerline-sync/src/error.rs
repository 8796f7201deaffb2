use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no signed-in user")]
    NoSession,
    #[error("connection failed after {attempts} reconnect attempts")]
    Failed { attempts: u32 },
    #[error("connection was torn down")]
    Closed,
    #[error("connection did not open within {0:?}")]
    Timeout(Duration),
}
