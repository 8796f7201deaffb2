use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ledgerline_relay::{telemetry::Telemetry, RelayConfig, RelayState, DEFAULT_LISTEN_ADDR};
use tokio::signal;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "ledgerline-relay",
    author,
    version,
    about = "WebSocket relay for Ledgerline portal sessions"
)]
struct Cli {
    /// Address to bind the websocket listener to.
    #[arg(long, env = "LEDGERLINE_RELAY_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    listen_addr: String,

    /// Name of the session cookie browsers send on upgrade.
    #[arg(long, env = "LEDGERLINE_RELAY_SESSION_COOKIE", default_value = "sid")]
    session_cookie: String,

    /// Frames buffered per connection before new ones are dropped.
    #[arg(long, env = "LEDGERLINE_RELAY_CHANNEL_DEPTH", default_value_t = 64)]
    channel_depth: usize,

    /// Grace period applied during shutdown.
    #[arg(long, env = "LEDGERLINE_RELAY_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    shutdown_grace_secs: u64,
}

impl TryFrom<Cli> for RelayConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        anyhow::ensure!(cli.channel_depth > 0, "channel depth must be at least 1");
        Ok(RelayConfig {
            listen_addr,
            session_cookie: cli.session_cookie,
            channel_depth: cli.channel_depth,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = RelayConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        channel_depth = config.channel_depth,
        "starting ledgerline relay"
    );

    let state = RelayState::new(&config, Some(telemetry.metrics_handle()));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("ledgerline relay listening on {}", config.listen_addr);

    ledgerline_relay::serve(listener, state, shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
