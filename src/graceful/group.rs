//! The close group: registration, shutdown trigger, and the drain loop.

use crate::graceful::signal;
use crate::graceful::task::Closer;
use crate::graceful::{Context, GracefulError, OnError, Options, TaskId, TaskResult};
use std::future::Future;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Owns the shutdown context, the registered closers and the result channel.
///
/// One group per orchestrated lifetime; [`CloseGroup::wait`] consumes it.
pub struct CloseGroup {
    shutdown: Context,
    closers: Vec<Closer>,
    results: UnboundedSender<TaskResult>,
    receiver: UnboundedReceiver<TaskResult>,
    on_error: OnError,
    teardown_limit: Option<Arc<Semaphore>>,
    /// Results still expected on the channel.
    pending: Arc<AtomicI32>,
    foreground: AtomicUsize,
}

/// Create a shutdown context derived from `parent` and the group that owns it.
///
/// When `options` lists signals, the context is cancelled on the first one
/// received. Signal listeners need a running Tokio runtime.
pub fn prepare(parent: &Context, options: Options) -> Result<(Context, CloseGroup), GracefulError> {
    let shutdown = parent.with_cancel();
    // The listener task is detached; it ends with the shutdown context.
    signal::wire(&shutdown, &options.notify)?;

    let (results, receiver) = mpsc::unbounded_channel();

    let group = CloseGroup {
        shutdown: shutdown.clone(),
        closers: Vec::new(),
        results,
        receiver,
        on_error: options.on_error,
        teardown_limit: options
            .teardown_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit))),
        pending: Arc::new(AtomicI32::new(0)),
        foreground: AtomicUsize::new(0),
    };

    Ok((shutdown, group))
}

impl CloseGroup {
    /// Run `task` in the background with the shutdown context.
    ///
    /// When the task returns, successfully or not, its result is queued for
    /// the drain and the shutdown context is cancelled. Must be called from
    /// within a Tokio runtime.
    pub fn process<R, F, Fut>(&self, resource: R, task: F)
    where
        R: Send + 'static,
        F: FnOnce(Context, R) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = TaskId::foreground(self.foreground.fetch_add(1, Ordering::Relaxed));
        self.pending.fetch_add(1, Ordering::SeqCst);

        let shutdown = self.shutdown.clone();
        let results = self.results.clone();

        debug!(task = %id, "starting foreground task");

        tokio::spawn(async move {
            let result = task(shutdown.clone(), resource).await;

            // Queue first so the drain sees this result before any teardown.
            report(&results, TaskResult { id, result });
            shutdown.cancel();
        });
    }

    /// Register `task` to close `resource` once shutdown begins.
    ///
    /// Nothing runs until [`CloseGroup::wait`].
    pub fn close<R, F, Fut>(&mut self, resource: R, task: F)
    where
        R: Send + 'static,
        F: FnOnce(Context, R) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = TaskId::teardown(self.closers.len());
        self.closers.push(Closer::new(id, resource, task));
    }

    /// The context whose completion starts teardown.
    pub fn shutdown_context(&self) -> &Context {
        &self.shutdown
    }

    /// Trigger shutdown explicitly.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Results the group still expects to receive.
    pub fn pending(&self) -> i32 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Number of registered closers.
    pub fn closers(&self) -> usize {
        self.closers.len()
    }

    /// Block until shutdown, then tear every registered resource down.
    ///
    /// Teardown runs under a fresh context that is independent from the
    /// shutdown context. A non-zero `timeout` bounds the drain; zero waits
    /// for every expected result. Failures go to the error sink in the order
    /// they are received.
    ///
    /// Tasks that have not reported when the deadline fires keep running
    /// detached; their teardown context is cancelled and their results are
    /// logged instead of reaching the sink.
    pub async fn wait(self, timeout: Duration) {
        let CloseGroup {
            shutdown,
            closers,
            results,
            mut receiver,
            on_error,
            teardown_limit,
            pending,
            ..
        } = self;

        shutdown.done().await;

        info!(
            closers = closers.len(),
            pending = pending.load(Ordering::SeqCst),
            "shutdown triggered"
        );

        // Teardown must not inherit the cancelled shutdown context.
        let ctx = if timeout > Duration::ZERO {
            Context::background().with_timeout(timeout)
        } else {
            Context::background()
        };

        let mut failures = 0usize;

        // Foreground results already queued, including the one that
        // triggered shutdown.
        while let Ok(result) = receiver.try_recv() {
            pending.fetch_sub(1, Ordering::SeqCst);
            failures += dispatch(&on_error, &ctx, result);
        }

        for closer in closers {
            pending.fetch_add(1, Ordering::SeqCst);

            let ctx = ctx.clone();
            let results = results.clone();
            let limit = teardown_limit.clone();

            debug!(task = %closer.id(), "starting teardown task");

            tokio::spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };

                let result = closer.run(ctx).await;
                report(&results, result);
            });
        }
        drop(results);

        loop {
            if pending.fetch_sub(1, Ordering::SeqCst) - 1 < 0 {
                break;
            }

            tokio::select! {
                received = receiver.recv() => match received {
                    Some(result) => failures += dispatch(&on_error, &ctx, result),
                    // Every producer is gone; nothing else can arrive.
                    None => break,
                },
                _ = ctx.done() => {
                    warn!(
                        outstanding = pending.load(Ordering::SeqCst) + 1,
                        timeout = %humantime::format_duration(timeout),
                        "teardown deadline elapsed before all results were drained"
                    );
                    break;
                }
            }
        }

        if timeout > Duration::ZERO {
            ctx.cancel();
        }

        info!(failures, "shutdown complete");
    }
}

/// Hand a failed result to the sink. Returns the number of failures seen.
fn dispatch(on_error: &OnError, ctx: &Context, result: TaskResult) -> usize {
    match result.into_failure() {
        Some(failure) => {
            on_error.dispatch(ctx, &failure);
            1
        }
        None => 0,
    }
}

/// Queue a result for the drain. Returns `false` if the drain already ended.
fn report(results: &UnboundedSender<TaskResult>, result: TaskResult) -> bool {
    debug!(task = %result.id, ok = result.result.is_ok(), "task finished");

    let Err(mpsc::error::SendError(late)) = results.send(result) else {
        return true;
    };

    match late.result {
        Ok(()) => debug!(task = %late.id, "task finished after drain ended"),
        Err(e) => {
            let error = format!("{:#}", e);
            warn!(
                task = %late.id,
                error = %error,
                "task failed after drain ended, error not delivered"
            );
        }
    }

    false
}
