//! Telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;

/// Configuration for logging and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded once at startup.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Logging configuration.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "hashd".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            metrics: MetricsConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl From<&hashd_config::TelemetrySection> for TelemetryConfig {
    fn from(section: &hashd_config::TelemetrySection) -> Self {
        Self {
            service_name: section.service_name.clone(),
            metrics: MetricsConfig::from(&section.metrics),
            logging: LogConfig::from(&section.logging),
            ..Self::default()
        }
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    service_version: Option<String>,
    metrics: Option<MetricsConfig>,
    logging: Option<LogConfig>,
}

impl TelemetryConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    #[must_use]
    pub fn service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Sets the service version.
    #[must_use]
    pub fn service_version(mut self, version: &str) -> Self {
        self.service_version = Some(version.to_string());
        self
    }

    /// Enables the Prometheus exporter on the given address.
    #[must_use]
    pub fn metrics_addr(mut self, addr: &str) -> Self {
        self.metrics = Some(MetricsConfig {
            enabled: true,
            addr: addr.to_string(),
        });
        self
    }

    /// Sets the metrics configuration.
    #[must_use]
    pub fn metrics(mut self, config: MetricsConfig) -> Self {
        self.metrics = Some(config);
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let defaults = TelemetryConfig::default();
        TelemetryConfig {
            service_name: self.service_name.unwrap_or(defaults.service_name),
            service_version: self.service_version.unwrap_or(defaults.service_version),
            metrics: self.metrics.unwrap_or(defaults.metrics),
            logging: self.logging.unwrap_or(defaults.logging),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = TelemetryConfig::builder().build();
        assert_eq!(config.service_name, "hashd");
        assert!(!config.metrics.enabled);
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_builder_overrides() {
        let config = TelemetryConfig::builder()
            .service_name("hashd-test")
            .service_version("9.9.9")
            .metrics_addr("127.0.0.1:9100")
            .logging(LogConfig::development())
            .build();

        assert_eq!(config.service_name, "hashd-test");
        assert_eq!(config.service_version, "9.9.9");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.addr, "127.0.0.1:9100");
        assert!(!config.logging.json_format);
    }

    #[test]
    fn test_from_section() {
        let mut section = hashd_config::TelemetrySection::default();
        section.service_name = "hashd-staging".to_string();
        section.metrics.enabled = true;

        let config = TelemetryConfig::from(&section);
        assert_eq!(config.service_name, "hashd-staging");
        assert!(config.metrics.enabled);
        assert_eq!(config.logging.level, "info");
    }
}
