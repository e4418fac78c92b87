//! rustgrace - in-process resource lifecycle orchestration
//!
//! This crate provides:
//! - A shutdown context cancelled by OS signals or explicit cancellation
//! - Foreground tasks whose completion starts a coordinated shutdown
//! - Parallel, deadline-bounded teardown of registered resources
//! - A pluggable error sink fed with every failed task result
//! - A YAML configured demo binary wiring an HTTP health server

pub mod config;
pub mod graceful;
pub mod server;
pub mod util;

pub use config::Config;
pub use graceful::{prepare, CloseGroup, Context, Options};
