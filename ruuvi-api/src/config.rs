//! API Configuration Module
//!
//! HTTP server settings and the environment lookup shared by every config
//! struct. Each struct starts from defaults suitable for development and is
//! overlaid by [`crate::settings::Settings`] with the config file, the
//! environment and command-line flags.

use ruuvi_core::ConfigError;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// ENVIRONMENT LOOKUP
// ============================================================================

/// Variable lookup. Production reads the process environment; tests pass a
/// closure over a fixed map.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse `key` if set; unparseable values count as unset.
pub(crate) fn env_parse<T: FromStr>(env: EnvLookup<'_>, key: &str) -> Option<T> {
    env(key).and_then(|s| s.trim().parse().ok())
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Interface to bind the HTTP listener to.
    pub bind_host: String,

    pub port: u16,

    /// Deadline for a `GET /` request, covering every store round trip.
    pub request_timeout: Duration,

    /// Deadline for `/health` and `/ready` pings.
    pub health_timeout: Duration,

    /// Largest accepted `n`.
    pub max_n: i64,

    /// `GET /` requests in flight before new ones are shed with 503.
    pub max_concurrent_requests: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(5),
            max_n: 1000,
            max_concurrent_requests: 64,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self::default().with_env(&process_env)
    }

    /// Overlay environment variables:
    /// - `RUUVI_API_BIND`: Listen address (default: 0.0.0.0)
    /// - `PORT` or `RUUVI_API_PORT`: Listen port (default: 8080)
    /// - `RUUVI_REQUEST_TIMEOUT_SECS`: Per-request deadline (default: 10)
    /// - `RUUVI_HEALTH_TIMEOUT_SECS`: Health ping deadline (default: 5)
    /// - `RUUVI_MAX_N`: Upper bound for `n` (default: 1000)
    /// - `RUUVI_MAX_CONCURRENT_REQUESTS`: In-flight limit for `GET /` (default: 64)
    pub fn with_env(mut self, env: EnvLookup<'_>) -> Self {
        if let Some(bind) = env("RUUVI_API_BIND") {
            self.bind_host = bind;
        }
        if let Some(port) = env_parse(env, "PORT").or_else(|| env_parse(env, "RUUVI_API_PORT")) {
            self.port = port;
        }
        if let Some(secs) = env_parse(env, "RUUVI_REQUEST_TIMEOUT_SECS") {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse(env, "RUUVI_HEALTH_TIMEOUT_SECS") {
            self.health_timeout = Duration::from_secs(secs);
        }
        if let Some(max_n) = env_parse(env, "RUUVI_MAX_N") {
            self.max_n = max_n;
        }
        if let Some(limit) = env_parse(env, "RUUVI_MAX_CONCURRENT_REQUESTS") {
            self.max_concurrent_requests = limit;
        }
        self
    }

    /// Reject limits the router cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_n < 1 {
            return Err(ConfigError::InvalidValue {
                field: "max_n".to_string(),
                value: self.max_n.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_requests".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_host
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                field: "server.bind".to_string(),
                value: self.bind_host.clone(),
                reason: e.to_string(),
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
