use std::env;
use std::time::Duration;

use url::Url;

pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:5000";
pub const DEFAULT_SOCKET_PATH: &str = "/ws";
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);

const ORIGIN_VAR: &str = "LEDGERLINE_ORIGIN";
const SOCKET_PATH_VAR: &str = "LEDGERLINE_SOCKET_PATH";
const RECONNECT_BASE_VAR: &str = "LEDGERLINE_RECONNECT_BASE_MS";
const MAX_ATTEMPTS_VAR: &str = "LEDGERLINE_MAX_RECONNECT_ATTEMPTS";
const CONNECT_TIMEOUT_VAR: &str = "LEDGERLINE_CONNECT_TIMEOUT_MS";
const SESSION_COOKIE_VAR: &str = "LEDGERLINE_SESSION_COOKIE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid origin {value:?}: {source}")]
    InvalidOrigin {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported origin scheme `{0}` (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

/// Sync client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Origin of the page the portal is served from.
    pub origin: Url,
    /// Fixed socket path on that origin.
    pub socket_path: String,
    pub reconnect_base: Duration,
    /// Backoff ceiling; no retry is scheduled once this many have run.
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
    /// `name=value` pair sent as the `Cookie` header on upgrade.
    pub session_cookie: Option<String>,
}

impl SyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(origin) = lookup(ORIGIN_VAR) {
            config.origin = parse_origin(&origin)?;
        }
        if let Some(path) = lookup(SOCKET_PATH_VAR) {
            config.socket_path = path;
        }
        if let Some(value) = lookup(RECONNECT_BASE_VAR) {
            config.reconnect_base = Duration::from_millis(parse_number(RECONNECT_BASE_VAR, &value)?);
        }
        if let Some(value) = lookup(MAX_ATTEMPTS_VAR) {
            let attempts = parse_number(MAX_ATTEMPTS_VAR, &value)?;
            config.max_reconnect_attempts =
                u32::try_from(attempts).map_err(|_| ConfigError::InvalidNumber {
                    var: MAX_ATTEMPTS_VAR,
                    value,
                })?;
        }
        if let Some(value) = lookup(CONNECT_TIMEOUT_VAR) {
            config.connect_timeout =
                Duration::from_millis(parse_number(CONNECT_TIMEOUT_VAR, &value)?);
        }
        config.session_cookie = lookup(SESSION_COOKIE_VAR).filter(|cookie| !cookie.is_empty());
        Ok(config)
    }

    pub fn with_origin(mut self, origin: &str) -> Result<Self, ConfigError> {
        self.origin = parse_origin(origin)?;
        Ok(self)
    }

    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    /// Socket URL on the page origin. Pages served over TLS get `wss`.
    pub fn socket_url(&self) -> Url {
        let mut url = self.origin.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        // http(s) and ws(s) are all special schemes, so the swap cannot fail
        let _ = url.set_scheme(scheme);
        url.set_path(&self.socket_path);
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    /// Backoff before the retry that follows `attempts` earlier retries.
    pub fn reconnect_delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.reconnect_base.saturating_mul(factor)
    }

    pub fn should_reconnect(&self, attempts: u32) -> bool {
        attempts < self.max_reconnect_attempts
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse(DEFAULT_ORIGIN).expect("DEFAULT_ORIGIN is a valid URL"),
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            reconnect_base: DEFAULT_RECONNECT_BASE,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session_cookie: None,
        }
    }
}

fn parse_origin(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidOrigin {
        value: value.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

fn parse_number(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        })
}
