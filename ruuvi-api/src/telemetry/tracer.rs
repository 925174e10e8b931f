//! Tracing Subscriber Initialization
//!
//! The filter is an `EnvFilter` directive string (`loglevel` in the config
//! file, `RUUVI_LOG`, or `--loglevel`) and the output format is `json` or
//! `text` (`log_format`, `RUUVI_LOG_FORMAT`).

use std::str::FromStr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{process_env, EnvLookup};
use crate::error::{ApiError, ApiResult};

const DEFAULT_FILTER: &str = "ruuvi_api=info,tower_http=info,info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            other => Err(ApiError::invalid_input(format!(
                "Unknown log format: {}",
                other
            ))),
        }
    }
}

/// Log filter and output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives
    pub filter: String,
    pub format: LogFormat,
    pub service_name: String,
    pub service_version: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
            service_name: "ruuvi-api".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self::default().with_env(&process_env)
    }

    /// Overlay `RUUVI_LOG` and `RUUVI_LOG_FORMAT`.
    pub fn with_env(mut self, env: EnvLookup<'_>) -> Self {
        if let Some(filter) = env("RUUVI_LOG") {
            self.filter = filter;
        }
        if let Some(format) = env("RUUVI_LOG_FORMAT").and_then(|s| s.parse().ok()) {
            self.format = format;
        }
        self
    }
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_tracer(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| ApiError::internal_error(format!("Invalid log filter: {}", e)))?;

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        service_version = %config.service_version,
        "Telemetry initialized"
    );

    Ok(())
}
