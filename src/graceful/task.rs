//! Task identities and the values that flow through the result channel.
//!
//! A task is any `FnOnce(Context, R) -> impl Future<Output = anyhow::Result<()>>`,
//! usually an `async fn` taking the context and the resource it manages.

use crate::graceful::Context;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;

/// Which half of the lifecycle a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Foreground,
    Teardown,
}

/// Identity of a producer: its phase and registration ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub phase: Phase,
    pub index: usize,
}

impl TaskId {
    pub fn foreground(index: usize) -> Self {
        Self {
            phase: Phase::Foreground,
            index,
        }
    }

    pub fn teardown(index: usize) -> Self {
        Self {
            phase: Phase::Teardown,
            index,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            Phase::Foreground => write!(f, "foreground#{}", self.index),
            Phase::Teardown => write!(f, "teardown#{}", self.index),
        }
    }
}

/// One message on the result channel.
#[derive(Debug)]
pub struct TaskResult {
    pub id: TaskId,
    pub result: anyhow::Result<()>,
}

impl TaskResult {
    /// Split into a failure for the error sink, if the task failed.
    pub fn into_failure(self) -> Option<TaskFailure> {
        self.result.err().map(|error| TaskFailure { id: self.id, error })
    }
}

/// A failed task result as handed to the error sink.
#[derive(Debug)]
pub struct TaskFailure {
    pub id: TaskId,
    pub error: anyhow::Error,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.id, self.error)
    }
}

type CloseFn = Box<dyn FnOnce(Context) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A registered teardown: one resource paired with the task that closes it.
///
/// Built at registration time and consumed by exactly one [`Closer::run`].
pub(crate) struct Closer {
    id: TaskId,
    close: CloseFn,
}

impl Closer {
    pub(crate) fn new<R, F, Fut>(id: TaskId, resource: R, task: F) -> Self
    where
        R: Send + 'static,
        F: FnOnce(Context, R) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            id,
            close: Box::new(move |ctx| task(ctx, resource).boxed()),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) async fn run(self, ctx: Context) -> TaskResult {
        TaskResult {
            id: self.id,
            result: (self.close)(ctx).await,
        }
    }
}
