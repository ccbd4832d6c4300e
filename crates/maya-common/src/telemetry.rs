//! Logging initialization
//!
//! JSON structured logs by default, filtered through `RUST_LOG`. Setting
//! `MAYA_LOG_FORMAT=text` switches to the human-readable formatter for local
//! runs.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log format
pub const LOG_FORMAT_ENV: &str = "MAYA_LOG_FORMAT";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output format of the log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable text
    Text,
}

impl LogFormat {
    /// Parse a format name, falling back to JSON for unknown values
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "plain" => Self::Text,
            _ => Self::Json,
        }
    }
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name logged once initialization succeeds (e.g., "maya-upgrade")
    pub service_name: String,

    /// Log line format
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "maya".to_string(),
            format: std::env::var(LOG_FORMAT_ENV)
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Example
///
/// ```ignore
/// use maya_common::telemetry::{init_telemetry, TelemetryConfig};
///
/// init_telemetry(TelemetryConfig {
///     service_name: "maya-upgrade".to_string(),
///     ..Default::default()
/// })?;
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,maya=debug,kube=info,tower=warn,hyper=warn"));

    let result = match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true)
                .with_file(false)
                .with_line_number(false);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
        }
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };

    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    tracing::debug!(service = %config.service_name, "telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse(" Pretty "), LogFormat::Text);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Json);
    }

    #[test]
    fn second_init_fails_cleanly() {
        let config = TelemetryConfig {
            service_name: "test".to_string(),
            format: LogFormat::Text,
        };
        let _ = init_telemetry(config.clone());
        assert!(init_telemetry(config).is_err());
    }
}
