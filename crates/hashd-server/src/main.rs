//! hashd - entry point
//!
//! Loads configuration, initializes telemetry and runs the server until a
//! signal or `/shutdown` request ends it. Exits non-zero when the drain did
//! not commit every accepted submission.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use hashd_config::{ConfigLoader, HashdConfig, DEFAULT_ENV_PREFIX};
use hashd_core::{EngineConfig, HashEngine};
use hashd_server::{Server, ServerConfig};
use hashd_telemetry::{init_telemetry, TelemetryConfig};

/// Command-line arguments. Flags override the file and `HASHD__*` variables.
#[derive(Parser, Debug)]
#[command(
    name = "hashd",
    version,
    about = "Accepts values over HTTP and serves their SHA-512 digests after a delay"
)]
struct Args {
    /// Configuration file (TOML or JSON).
    #[arg(short, long, env = "HASHD_CONFIG")]
    config: Option<PathBuf>,

    /// Start from the development preset (pretty debug logs, 1s delay).
    #[arg(long)]
    development: bool,

    /// HTTP bind address, e.g. "127.0.0.1:8080".
    #[arg(long)]
    http_addr: Option<String>,

    /// Delay before a submission is hashed, in milliseconds.
    #[arg(long)]
    hash_delay_ms: Option<u64>,

    /// Upper bound on the shutdown drain, in seconds.
    #[arg(long)]
    drain_timeout_secs: Option<u64>,

    /// Log filter used when RUST_LOG is unset, e.g. "info" or "hashd_core=debug".
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<HashdConfig> {
        let mut loader = ConfigLoader::new().with_dotenv();
        if self.development {
            loader = loader.with_development();
        }
        if let Some(path) = &self.config {
            loader = loader
                .with_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
        }

        let mut config = loader
            .with_env_prefix(DEFAULT_ENV_PREFIX)
            .load()
            .context("invalid configuration")?;

        if let Some(addr) = &self.http_addr {
            config.server.http_addr.clone_from(addr);
        }
        if let Some(delay) = self.hash_delay_ms {
            config.engine.hash_delay_ms = delay;
        }
        if let Some(timeout) = self.drain_timeout_secs {
            config.engine.drain_timeout_secs = timeout;
        }
        if let Some(level) = &self.log_level {
            config.telemetry.logging.level.clone_from(level);
        }

        config
            .validate()
            .context("invalid configuration after command-line overrides")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let config = args.load_config()?;

    init_telemetry(&TelemetryConfig::from(&config.telemetry))
        .context("failed to initialize telemetry")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        http_addr = %config.server.http_addr,
        hash_delay_ms = config.engine.hash_delay_ms,
        drain_timeout_secs = config.engine.drain_timeout_secs,
        "starting hashd"
    );
    tracing::debug!(?config, "effective configuration");

    let engine = HashEngine::new(EngineConfig::new().with_hash_delay(config.engine.hash_delay()));
    let server = Server::new(ServerConfig::from(&config), engine);

    let report = server.run().await.context("server failed")?;

    if report.is_clean() {
        info!(elapsed = ?report.elapsed, "hashd stopped");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            outcome = ?report.outcome,
            accepted = report.progress.accepted,
            committed = report.progress.committed,
            failed = report.progress.failed,
            abandoned = ?report.abandoned,
            "hashd stopped with uncommitted submissions"
        );
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::try_parse_from([
            "hashd",
            "--http-addr",
            "127.0.0.1:9999",
            "--hash-delay-ms",
            "10",
            "--drain-timeout-secs",
            "3",
            "--log-level",
            "debug",
        ])
        .unwrap();

        let config = args.load_config().unwrap();
        assert_eq!(config.server.http_addr, "127.0.0.1:9999");
        assert_eq!(config.engine.hash_delay_ms, 10);
        assert_eq!(config.engine.drain_timeout_secs, 3);
        assert_eq!(config.telemetry.logging.level, "debug");
    }

    #[test]
    fn test_cli_override_is_validated() {
        let args = Args::try_parse_from(["hashd", "--http-addr", "nowhere"]).unwrap();
        assert!(args.load_config().is_err());
    }
}
