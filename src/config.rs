//! Configuration for the admin client.
//!
//! All timing values are milliseconds. The defaults mirror the
//! conventional admin-client settings; see [`crate::constants`] for the
//! rationale behind each value.
//!
//! ```rust
//! use bureaucrat::config::AdminConfig;
//!
//! let mut config = AdminConfig::default();
//! config.bootstrap_servers = vec!["broker-1:9092".to_string()];
//! config.retry_backoff_ms = 250;
//! assert!(config.validate().is_ok());
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_METADATA_MAX_AGE_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_RETRY_BACKOFF_MS, MAX_POLL_TIMEOUT_MS,
};
use crate::error::{Error, Result};

/// Sequence for naming clients the user hasn't named explicitly.
/// The only process-wide state in the crate; consulted at construction only.
static CLIENT_ID_SEQUENCE: AtomicU32 = AtomicU32::new(1);

/// Configuration for [`AdminClient`](crate::dispatch::AdminClient).
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Client identity used in thread names and log lines.
    /// When empty, an `admin-<n>` id is generated.
    pub client_id: String,

    /// Seed brokers as `host:port` strings. Used only to build the initial
    /// (never "ready") metadata snapshot; the network client owns its own
    /// connection bootstrap.
    pub bootstrap_servers: Vec<String>,

    /// Default per-call deadline, measured from submission.
    pub request_timeout_ms: i64,

    /// Gap between attempts of the same call after a retriable failure.
    /// Also the backoff between metadata refresh attempts.
    pub retry_backoff_ms: i64,

    /// Retry attempts allowed beyond the first try.
    pub max_retries: u32,

    /// Maximum age of a metadata snapshot before a refresh is scheduled.
    pub metadata_max_age_ms: i64,

    /// Upper bound on how long a single network poll may block, even with
    /// nothing scheduled sooner.
    pub safety_poll_ceiling_ms: i64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        AdminConfig {
            client_id: String::new(),
            bootstrap_servers: vec!["localhost:9092".to_string()],
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            metadata_max_age_ms: DEFAULT_METADATA_MAX_AGE_MS,
            safety_poll_ceiling_ms: MAX_POLL_TIMEOUT_MS,
        }
    }
}

impl AdminConfig {
    /// Create configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    ///
    /// - `BOOTSTRAP_SERVERS`: comma-separated `host:port` list
    /// - `REQUEST_TIMEOUT_MS`, `RETRY_BACKOFF_MS`, `MAX_RETRIES`,
    ///   `METADATA_MAX_AGE_MS`
    /// - `CLIENT_ID`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        let bootstrap_servers = std::env::var("BOOTSTRAP_SERVERS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.bootstrap_servers);

        AdminConfig {
            client_id: std::env::var("CLIENT_ID").unwrap_or(defaults.client_id),
            bootstrap_servers,
            request_timeout_ms: parse_var("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            retry_backoff_ms: parse_var("RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            max_retries: parse_var("MAX_RETRIES", defaults.max_retries),
            metadata_max_age_ms: parse_var("METADATA_MAX_AGE_MS", defaults.metadata_max_age_ms),
            safety_poll_ceiling_ms: parse_var(
                "SAFETY_POLL_CEILING_MS",
                defaults.safety_poll_ceiling_ms,
            ),
        }
    }

    /// Check the configuration for values the worker cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_servers.is_empty() {
            return Err(Error::Config(
                "bootstrap_servers must name at least one broker".to_string(),
            ));
        }
        if self.request_timeout_ms <= 0 {
            return Err(Error::Config(format!(
                "request_timeout_ms must be positive, got {}",
                self.request_timeout_ms
            )));
        }
        if self.retry_backoff_ms < 0 {
            return Err(Error::Config(format!(
                "retry_backoff_ms must be non-negative, got {}",
                self.retry_backoff_ms
            )));
        }
        if self.metadata_max_age_ms <= 0 {
            return Err(Error::Config(format!(
                "metadata_max_age_ms must be positive, got {}",
                self.metadata_max_age_ms
            )));
        }
        if self.safety_poll_ceiling_ms <= 0 {
            return Err(Error::Config(format!(
                "safety_poll_ceiling_ms must be positive, got {}",
                self.safety_poll_ceiling_ms
            )));
        }
        self.parse_bootstrap().map(|_| ())
    }

    /// Parse `bootstrap_servers` into `(host, port)` pairs.
    pub fn parse_bootstrap(&self) -> Result<Vec<(String, u16)>> {
        self.bootstrap_servers
            .iter()
            .map(|addr| {
                let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
                    Error::Config(format!("bootstrap address '{addr}' is missing a port"))
                })?;
                if host.is_empty() {
                    return Err(Error::Config(format!(
                        "bootstrap address '{addr}' is missing a host"
                    )));
                }
                let port = port.parse::<u16>().map_err(|_| {
                    Error::Config(format!("bootstrap address '{addr}' has an invalid port"))
                })?;
                Ok((host.to_string(), port))
            })
            .collect()
    }

    /// The effective client id: the configured one, or a generated
    /// `admin-<n>` identity.
    pub fn effective_client_id(&self) -> String {
        if !self.client_id.is_empty() {
            return self.client_id.clone();
        }
        format!("admin-{}", CLIENT_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed))
    }
}
