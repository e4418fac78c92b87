//! Resource lifecycle orchestration.
//!
//! A [`CloseGroup`] starts long-running foreground tasks, waits for an OS
//! signal or the first foreground task to finish, then runs every registered
//! teardown task in parallel under a deadline and drains their results into
//! an error sink.
//!
//! ```no_run
//! use rustgrace::graceful::{prepare, Context, Options};
//! use std::time::Duration;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let (_shutdown, mut group) = prepare(&Context::background(), Options::default())?;
//!
//! group.process((), |ctx: Context, _: ()| async move {
//!     ctx.done().await;
//!     Ok(())
//! });
//! group.close((), |_ctx: Context, _: ()| async move { Ok(()) });
//!
//! group.wait(Duration::from_secs(10)).await;
//! # Ok(())
//! # }
//! ```

mod context;
mod group;
mod options;
mod signal;
mod task;

pub use context::{Context, ContextError};
pub use group::{prepare, CloseGroup};
pub use options::{OnError, Options};
pub use signal::{Notify, Signal};
pub use task::{Phase, TaskFailure, TaskId, TaskResult};

use thiserror::Error;

/// Errors raised while preparing a group.
#[derive(Debug, Error)]
pub enum GracefulError {
    #[error("failed to listen for {signal} signal: {source}")]
    Signal {
        signal: Signal,
        #[source]
        source: std::io::Error,
    },
}
