//! Options accepted by [`prepare`](crate::graceful::prepare).

use crate::graceful::{Context, Notify, TaskFailure};
use std::fmt;
use std::sync::Arc;
use tracing::error;

type SinkFn = dyn Fn(&Context, &TaskFailure) + Send + Sync;

/// Error sink: invoked once per drained failure, on the waiting task.
#[derive(Clone)]
pub struct OnError {
    func: Arc<SinkFn>,
}

impl OnError {
    /// Pair a handler object with the function that reports through it.
    pub fn new<H, F>(handler: H, func: F) -> Self
    where
        H: Send + Sync + 'static,
        F: Fn(&Context, &H, &TaskFailure) + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(move |ctx, failure| func(ctx, &handler, failure)),
        }
    }

    /// Use a plain closure as the sink.
    pub fn from_fn<F>(func: F) -> Self
    where
        F: Fn(&Context, &TaskFailure) + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    pub(crate) fn dispatch(&self, ctx: &Context, failure: &TaskFailure) {
        (self.func)(ctx, failure)
    }
}

impl Default for OnError {
    fn default() -> Self {
        Self::from_fn(|_, failure| {
            let error = format!("{:#}", failure.error);
            error!(task = %failure.id, error = %error, "task failed");
        })
    }
}

impl fmt::Debug for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnError").finish_non_exhaustive()
    }
}

/// Group configuration. Unset fields fall back to their defaults.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub(crate) notify: Notify,
    pub(crate) on_error: OnError,
    pub(crate) teardown_concurrency: Option<usize>,
}

impl Options {
    /// Signals that trigger shutdown (default: interrupt).
    pub fn notify(mut self, notify: Notify) -> Self {
        self.notify = notify;
        self
    }

    /// Error sink (default: log through `tracing`).
    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    /// Run at most `limit` teardown tasks at a time. Unbounded by default.
    pub fn teardown_concurrency(mut self, limit: usize) -> Self {
        self.teardown_concurrency = Some(limit.max(1));
        self
    }
}
