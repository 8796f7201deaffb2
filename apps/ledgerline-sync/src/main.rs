use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser};
use ledgerline_proto::{ProjectId, QueryKey, UserId};
use ledgerline_sync::telemetry::{self, LogConfig, LogLevel};
use ledgerline_sync::transport::WebSocketConnector;
use ledgerline_sync::{
    ConnectionRegistry, QueryStore, SessionUser, StaticSession, SubscriptionScope, SyncConfig,
    SyncError, TracingNotifier,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "ledgerline-sync",
    author,
    version,
    about = "Headless Ledgerline sync session: logs toasts and stale queries"
)]
struct Cli {
    /// Portal user this session acts as.
    #[arg(long, env = "LEDGERLINE_USER_ID")]
    user_id: i64,

    /// Page origin the socket URL derives from.
    #[arg(long)]
    origin: Option<String>,

    /// `name=value` session cookie established by REST login.
    #[arg(long)]
    session_cookie: Option<String>,

    /// Only follow tasks of this project.
    #[arg(long)]
    project: Option<i64>,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "LEDGERLINE_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "LEDGERLINE_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard =
        telemetry::init(&cli.logging.to_config()).context("failed to initialise logging")?;

    let mut config = SyncConfig::from_env().context("invalid sync configuration")?;
    if let Some(origin) = &cli.origin {
        config = config
            .with_origin(origin)
            .with_context(|| format!("invalid --origin {origin}"))?;
    }
    if let Some(cookie) = cli.session_cookie {
        config = config.with_session_cookie(cookie);
    }

    let session = Arc::new(StaticSession::signed_in(SessionUser::new(UserId(cli.user_id))));
    let store = Arc::new(QueryStore::new());
    // the views a portal session keeps mounted
    for key in [QueryKey::tasks(), QueryKey::projects(), QueryKey::messages()] {
        store.record_fetch(key);
    }
    let mut stale = store.subscribe();
    let registry = ConnectionRegistry::new(
        config,
        Arc::new(WebSocketConnector),
        session,
        Arc::new(TracingNotifier),
        store.clone(),
    );

    let lease = registry.acquire().ok_or(SyncError::NoSession)?;
    let _subscription = lease.subscribe(SubscriptionScope::Tasks {
        project: cli.project.map(ProjectId),
    });
    let mut state = lease.watch();
    info!(user = cli.user_id, "ledgerline-sync session started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                info!(
                    phase = ?snapshot.phase,
                    attempts = snapshot.reconnect_attempts,
                    retry_in_ms = snapshot.retry_in.map(|d| d.as_millis() as u64),
                    "connection state"
                );
            }
            key = stale.recv() => match key {
                Ok(key) if store.is_stale(&key) => {
                    info!(key = %key, "query stale; refetching");
                    store.record_fetch(key);
                }
                Ok(key) => debug!(key = %key, "stale query not mounted; skipping"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "stale-query listener lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("shutting down");
    Ok(())
}
