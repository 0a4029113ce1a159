//! Process configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use relay::RelayConfig;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" | "plain" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json` (default `pretty`)
/// - `DATABASE_URL`: PostgreSQL connection string; the in-memory store is
///   used when unset
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default `10`)
/// - `OUTBOX_BATCH_SIZE`, `OUTBOX_POLL_INTERVAL_MS`, `OUTBOX_MAX_RETRIES`,
///   `OUTBOX_RETRY_BACKOFF_SECS`, `OUTBOX_PROCESSING_TIMEOUT_SECS`,
///   `OUTBOX_WORKERS`: relay tuning, see [`RelayConfig`]
///
/// Absent or unparsable values fall back to the defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub relay: RelayConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let mut relay = defaults.relay.clone();
        if let Some(n) = parsed("OUTBOX_BATCH_SIZE") {
            relay = relay.with_batch_size(n as usize);
        }
        if let Some(ms) = parsed("OUTBOX_POLL_INTERVAL_MS") {
            relay = relay.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(n) = parsed("OUTBOX_MAX_RETRIES") {
            relay = relay.with_max_retries(i32::try_from(n).unwrap_or(i32::MAX));
        }
        if let Some(secs) = parsed("OUTBOX_RETRY_BACKOFF_SECS") {
            relay = relay.with_retry_backoff(Duration::from_secs(secs));
        }
        if let Some(secs) = parsed("OUTBOX_PROCESSING_TIMEOUT_SECS") {
            relay = relay.with_processing_timeout(Duration::from_secs(secs));
        }
        if let Some(n) = parsed("OUTBOX_WORKERS") {
            relay = relay.with_workers(n as usize);
        }

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.database_max_connections),
            relay,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            relay: RelayConfig::default(),
        }
    }
}
