//! Telemetry: structured logging and aggregation metrics.
//!
//! - **Logging**: JSON/pretty/compact output through `tracing-subscriber`
//! - **Metrics**: counters and histograms on the `metrics` facade
//!
//! # Example
//!
//! ```rust,no_run
//! use allend_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! let config = TelemetryConfig::default();
//! init_telemetry(&config).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{describe_metrics, AggregationMetrics};

use serde::Deserialize;

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "allend".to_string()
}

fn default_environment() -> String {
    std::env::var("ALLEND_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Initialize logging and register metric descriptions.
///
/// Call once at application startup.
///
/// # Errors
///
/// Returns an error if the logging subscriber fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    describe_metrics();
    init_logging(&config.logging, &config.environment)?;

    ::tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        version = env!("CARGO_PKG_VERSION"),
        "Telemetry initialized"
    );
    Ok(())
}
