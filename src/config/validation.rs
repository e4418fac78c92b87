//! Configuration validation.

use crate::config::Config;
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - A known log level
/// - No duplicate shutdown signals
/// - A non-zero teardown concurrency limit when one is set
///
/// An empty signal list is valid: shutdown is then only triggered by the
/// server task finishing.
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing the problem.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    // Check for duplicate signals
    let mut signals = HashSet::new();
    for signal in &config.shutdown.signals {
        if !signals.insert(*signal) {
            errors.push(format!("duplicate shutdown signal: {}", signal));
        }
    }

    if config.shutdown.teardown_concurrency == Some(0) {
        errors.push("teardown_concurrency must be >= 1 when set".to_string());
    }

    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
