//! Root configuration type and its builder.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, EngineSection, LogFormat, ServerSection, TelemetrySection};

/// Longest drain timeout accepted by [`HashdConfig::validate`], one day.
pub const MAX_DRAIN_TIMEOUT_SECS: u64 = 86_400;

/// Complete hashd configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use hashd_config::HashdConfig;
///
/// let config = HashdConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.engine.hash_delay_ms, 5_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct HashdConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Hashing engine and drain settings.
    #[serde(default)]
    pub engine: EngineSection,

    /// Logging and metrics settings.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl HashdConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> HashdConfigBuilder {
        HashdConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if:
    /// - an address does not parse as a socket address
    /// - the drain poll interval or drain timeout is zero
    /// - the drain timeout is shorter than one poll interval
    /// - the drain timeout exceeds [`MAX_DRAIN_TIMEOUT_SECS`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if self.telemetry.metrics.enabled
            && self.telemetry.metrics.addr.parse::<SocketAddr>().is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        if self.engine.drain_poll_interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "engine.drain_poll_interval_ms",
                "must be greater than zero",
            ));
        }

        if self.engine.drain_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "engine.drain_timeout_secs",
                "must be greater than zero",
            ));
        }

        if self.engine.drain_timeout_secs > MAX_DRAIN_TIMEOUT_SECS {
            return Err(ConfigError::invalid_value(
                "engine.drain_timeout_secs",
                format!("must be at most {MAX_DRAIN_TIMEOUT_SECS}"),
            ));
        }

        if self.engine.drain_timeout() < self.engine.drain_poll_interval() {
            return Err(ConfigError::invalid_value(
                "engine.drain_timeout_secs",
                "must be at least one drain poll interval",
            ));
        }

        Ok(())
    }

    /// Development preset: pretty debug logs and a short hash delay.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.include_location = true;
        config.engine.hash_delay_ms = 1_000;

        config
    }

    /// Production preset: JSON info logs and Prometheus metrics.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.metrics.enabled = true;

        config
    }
}

/// Builder for [`HashdConfig`].
#[derive(Debug, Default)]
pub struct HashdConfigBuilder {
    config: HashdConfig,
}

impl HashdConfigBuilder {
    /// Create a builder starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server section.
    #[must_use]
    pub fn server(mut self, server: ServerSection) -> Self {
        self.config.server = server;
        self
    }

    /// Set the engine section.
    #[must_use]
    pub fn engine(mut self, engine: EngineSection) -> Self {
        self.config.engine = engine;
        self
    }

    /// Set the telemetry section.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetrySection) -> Self {
        self.config.telemetry = telemetry;
        self
    }

    /// Build the configuration without validating it.
    #[must_use]
    pub fn build(self) -> HashdConfig {
        self.config
    }
}
