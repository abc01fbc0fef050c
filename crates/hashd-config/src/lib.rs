//! Typed configuration for hashd.
//!
//! Configuration is loaded in layers (defaults, then a TOML or JSON file,
//! then `HASHD__SECTION__KEY` environment variables) and validated before
//! use. Unknown fields in files are rejected.
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! request_timeout_secs = 30
//!
//! [engine]
//! hash_delay_ms = 5000
//! drain_poll_interval_ms = 1000
//! drain_timeout_secs = 60
//!
//! [telemetry]
//! service_name = "hashd"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//!
//! [telemetry.metrics]
//! enabled = false
//! addr = "0.0.0.0:9090"
//! ```

mod config;
mod error;
mod loader;
mod schema;

pub use config::{HashdConfig, HashdConfigBuilder, MAX_DRAIN_TIMEOUT_SECS};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{
    EngineSection, LogFormat, LoggingSection, MetricsSection, ServerSection, TelemetrySection,
};
