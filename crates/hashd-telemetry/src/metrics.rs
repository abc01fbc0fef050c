//! Prometheus export for hashd metrics.
//!
//! The engine records through the `metrics` facade unconditionally; those
//! calls are no-ops until [`init_metrics`] installs the Prometheus recorder.
//!
//! # Exported Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hashd_submissions_total` | Counter | - | Accepted submissions |
//! | `hashd_rejected_submissions_total` | Counter | - | Rejected submissions |
//! | `hashd_commits_total` | Counter | - | Committed digests |
//! | `hashd_worker_failures_total` | Counter | - | Workers that never committed |
//! | `hashd_in_flight_workers` | Gauge | - | Workers spawned and not finished |
//! | `hashd_processing_duration_seconds` | Histogram | `phase` | Measured time per phase |

use std::net::SocketAddr;

use hashd_core::metrics::names;
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are exported.
    pub enabled: bool,

    /// Address of the Prometheus scrape endpoint (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

impl From<&hashd_config::MetricsSection> for MetricsConfig {
    fn from(section: &hashd_config::MetricsSection) -> Self {
        Self {
            enabled: section.enabled,
            addr: section.addr.clone(),
        }
    }
}

/// Installs the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime so the HTTP listener is
/// spawned onto it.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` if `addr` does not parse, or
/// `TelemetryError::MetricsInit` if a recorder is already installed or the
/// listener cannot bind.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr = parse_addr(&config.addr)?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    register_metric_descriptions();
    tracing::info!(%addr, "prometheus exporter listening");

    Ok(())
}

fn parse_addr(addr: &str) -> TelemetryResult<SocketAddr> {
    addr.parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))
}

fn register_metric_descriptions() {
    describe_counter!(names::SUBMISSIONS_TOTAL, "Submissions accepted and assigned an id");
    describe_counter!(
        names::REJECTED_SUBMISSIONS_TOTAL,
        "Submissions rejected before a worker was spawned"
    );
    describe_counter!(names::COMMITS_TOTAL, "Digests committed to the result store");
    describe_counter!(
        names::WORKER_FAILURES_TOTAL,
        "Workers that finished without committing a digest"
    );
    describe_gauge!(
        names::IN_FLIGHT_WORKERS,
        "Workers spawned and not yet finished"
    );
    describe_histogram!(
        names::PROCESSING_DURATION_SECONDS,
        Unit::Seconds,
        "Measured processing time per phase, excluding the hash delay"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_disabled() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.addr, "0.0.0.0:9090");
    }

    #[test]
    fn test_disabled_metrics_is_noop() {
        let config = MetricsConfig {
            enabled: false,
            addr: "not an address".to_string(),
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_addr_rejected() {
        let config = MetricsConfig {
            enabled: true,
            addr: "localhost".to_string(),
        };
        let err = init_metrics(&config).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidAddress(_)));
    }

    #[test]
    fn test_from_metrics_section() {
        let section = hashd_config::MetricsSection {
            enabled: true,
            addr: "127.0.0.1:9191".to_string(),
        };
        let config = MetricsConfig::from(&section);
        assert!(config.enabled);
        assert_eq!(config.addr, "127.0.0.1:9191");
    }

    #[test]
    fn test_descriptions_without_recorder() {
        register_metric_descriptions();
    }
}
