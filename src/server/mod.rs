//! HTTP health server used as the demo resource.

mod health;

pub use health::{HealthServer, ServerError};
