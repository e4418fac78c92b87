//! rustgrace - lifecycle orchestration demo
//!
//! Runs an HTTP health server until a shutdown signal arrives, then tears
//! it down within the configured deadline.
//!
//! Usage:
//!     rustgrace [--config <path>]
//!
//! See --help for more options.

use anyhow::{Context as _, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use rustgrace::config::{load_config, validate_config, Config};
use rustgrace::graceful::{prepare, Context, Notify, Options};
use rustgrace::server::HealthServer;
use rustgrace::util::init_logging;

/// Run a health server under graceful lifecycle management.
#[derive(Parser, Debug)]
#[command(name = "rustgrace")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Override the listen address
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Override the teardown deadline (e.g. "10s", "0s" for none)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        None => Config::default(),
    };

    // `load_config` validates the file; overrides need a second pass.
    if apply_overrides(&mut config, &cli) {
        validate_config(&config)
            .map_err(anyhow::Error::msg)
            .context("invalid command-line override")?;
    }

    init_logging(&config.global.log_level, &config.global.log_format)
        .context("failed to initialize logging")?;

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {}", config.server.listen);
        println!("  Signals: {:?}", config.shutdown.signals);
        println!(
            "  Timeout: {}",
            humantime::format_duration(config.shutdown.timeout)
        );
        return Ok(());
    }

    info!(
        listen = %config.server.listen,
        signals = ?config.shutdown.signals,
        timeout = %humantime::format_duration(config.shutdown.timeout),
        "rustgrace starting"
    );

    run(config)
}

/// Apply command-line overrides. Returns whether any was given.
fn apply_overrides(config: &mut Config, cli: &Cli) -> bool {
    let mut applied = false;

    if let Some(level) = &cli.log_level {
        config.global.log_level = level.clone();
        applied = true;
    }
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
        applied = true;
    }
    if let Some(timeout) = cli.timeout {
        config.shutdown.timeout = timeout;
        applied = true;
    }

    applied
}

/// Run the server with the given configuration.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(config).await })
}

async fn serve(ctx: Context, server: Arc<HealthServer>) -> Result<()> {
    server.run(ctx).await
}

async fn stop(ctx: Context, server: Arc<HealthServer>) -> Result<()> {
    server.close(ctx).await
}

/// Async entry point.
async fn run_async(config: Config) -> Result<()> {
    let mut options =
        Options::default().notify(Notify::new(config.shutdown.signals.iter().copied()));
    if let Some(limit) = config.shutdown.teardown_concurrency {
        options = options.teardown_concurrency(limit);
    }

    let (_shutdown, mut group) =
        prepare(&Context::background(), options).context("failed to prepare shutdown")?;

    let server = Arc::new(
        HealthServer::bind(config.server.listen)
            .await
            .context("failed to start health server")?,
    );

    group.process(Arc::clone(&server), serve);
    group.close(server, stop);

    info!("rustgrace is running");
    info!("press Ctrl+C to stop");

    group.wait(config.shutdown.timeout).await;

    info!("rustgrace shut down complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_overrides_leaves_config_untouched() {
        let cli = Cli::parse_from(["rustgrace"]);
        let mut config = Config::default();

        assert!(!apply_overrides(&mut config, &cli));
        assert_eq!(config.shutdown.timeout, Config::default().shutdown.timeout);
    }

    #[test]
    fn test_overrides_are_applied_and_revalidated() {
        let cli = Cli::parse_from(["rustgrace", "--timeout", "250ms", "--log-level", "loud"]);
        let mut config = Config::default();

        assert!(apply_overrides(&mut config, &cli));
        assert_eq!(config.shutdown.timeout, Duration::from_millis(250));
        assert_eq!(config.global.log_level, "loud");
        assert!(validate_config(&config).is_err());
    }
}
