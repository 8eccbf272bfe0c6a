//! Configuration management.

use std::path::Path;

use serde::Deserialize;

use crate::aggregate::AggregatorConfig;
use crate::error::Result;
use crate::telemetry::TelemetryConfig;

const ENV_PREFIX: &str = "ALLEND";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Aggregator defaults
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Logging and metrics configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from `ALLEND__*` environment variables.
    ///
    /// `ALLEND__AGGREGATOR__DEFAULT_POLICY=all` sets `aggregator.default_policy`.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
