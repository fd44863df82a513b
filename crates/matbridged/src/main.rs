//! matbridged - serves the matbridge tools over stdio.
//!
//! Reads line-delimited JSON-RPC 2.0 from stdin and writes responses to
//! stdout. Logs go to stderr.

mod protocol;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use matbridge_core::metrics::METRICS;
use matbridge_core::telemetry::init_tracing;
use matbridge_core::{BridgeConfig, ExecutionController, FsFigureSink, SessionPool, ToolRouter};
use matbridge_interp::{InterpEngine, DEFAULT_STEP_LIMIT};
use tracing::{info, Level};

use crate::server::Server;

#[derive(Parser, Debug)]
#[command(name = "matbridged")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Numeric workspace bridge for tool-calling assistants", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "MATBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for scripts written by create_script
    #[arg(long, env = "MATBRIDGE_SCRIPTS_DIR")]
    scripts_dir: Option<PathBuf>,

    /// Directory for exported figures
    #[arg(long, env = "MATBRIDGE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Wall-clock limit per execution in milliseconds (0 disables it)
    #[arg(long, env = "MATBRIDGE_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Interpreter step budget per execution
    #[arg(long, env = "MATBRIDGE_STEP_LIMIT", default_value_t = DEFAULT_STEP_LIMIT)]
    step_limit: u64,

    /// Log verbosity when RUST_LOG is unset
    #[arg(long, env = "MATBRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => BridgeConfig::default(),
        };
        if let Some(dir) = &self.scripts_dir {
            config.scripts_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        match self.timeout_ms {
            Some(0) => config.execution_timeout_ms = None,
            Some(ms) => config.execution_timeout_ms = Some(ms),
            None => {}
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, cli.log_level);

    let config = Arc::new(cli.bridge_config()?);
    info!(
        scripts_dir = %config.scripts_dir.display(),
        output_dir = %config.output_dir.display(),
        step_limit = cli.step_limit,
        "starting matbridged"
    );

    let pool = Arc::new(SessionPool::new(
        Arc::new(InterpEngine::factory(cli.step_limit)),
        &config,
    ));
    let sink = Arc::new(FsFigureSink::new(config.output_dir.clone()));
    let controller = ExecutionController::new(Arc::clone(&config), sink);
    let server = Server::new(ToolRouter::new(Arc::clone(&pool), controller));

    let reaper = spawn_reaper(pool, Duration::from_secs(config.idle_timeout_secs.max(1)));

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let result = server.serve(stdin, tokio::io::stdout()).await;

    reaper.abort();
    METRICS.flush();
    result.context("stdio transport failed")
}

/// Periodically close idle or unavailable sessions.
fn spawn_reaper(pool: Arc<SessionPool>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let closed = pool.reap_idle();
            if !closed.is_empty() {
                info!(count = closed.len(), "reaped sessions");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(
            &path,
            "scripts_dir = \"from_file\"\nexecution_timeout_ms = 5000\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "matbridged",
            "--config",
            path.to_str().unwrap(),
            "--output-dir",
            "/tmp/figs",
            "--timeout-ms",
            "0",
        ]);
        let config = cli.bridge_config().unwrap();
        assert_eq!(config.scripts_dir, PathBuf::from("from_file"));
        assert_eq!(config.output_dir, PathBuf::from("/tmp/figs"));
        assert_eq!(config.execution_timeout_ms, None);
    }

    #[test]
    fn defaults_without_config_file() {
        let cli = Cli::parse_from(["matbridged", "--log-level", "debug"]);
        assert_eq!(cli.log_level, Level::DEBUG);
        assert_eq!(cli.step_limit, DEFAULT_STEP_LIMIT);
        let config = cli.bridge_config().unwrap();
        assert_eq!(config.max_sessions, BridgeConfig::default().max_sessions);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["matbridged", "--config", "/nonexistent/matbridge.toml"]);
        assert!(cli.bridge_config().is_err());
    }
}
