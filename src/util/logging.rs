//! Logging initialization and configuration.

use crate::config::LogFormat;
use tracing::Subscriber;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `level` when it is set. Fails if a
/// global subscriber is already installed.
///
/// # Arguments
///
/// * `level` - Log level filter (e.g., "info", "rustgrace=debug")
/// * `format` - Log output format (json or pretty)
pub fn init_logging(level: &str, format: &LogFormat) -> Result<(), TryInitError> {
    build_subscriber(level, format).try_init()
}

fn build_subscriber(level: &str, format: &LogFormat) -> Box<dyn Subscriber + Send + Sync> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => Box::new(registry.with(fmt::layer().json().with_current_span(false))),
        LogFormat::Pretty => Box::new(registry.with(fmt::layer().pretty())),
    }
}
