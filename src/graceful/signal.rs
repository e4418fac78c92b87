//! OS signal wiring for the shutdown context.

use crate::graceful::{Context, GracefulError};
use futures::future::select_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// OS signals that can trigger shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGHUP
    Hangup,
    /// SIGQUIT
    Quit,
    /// SIGUSR1
    User1,
    /// SIGUSR2
    User2,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Interrupt => "interrupt",
            Signal::Terminate => "terminate",
            Signal::Hangup => "hangup",
            Signal::Quit => "quit",
            Signal::User1 => "user1",
            Signal::User2 => "user2",
        };
        f.write_str(name)
    }
}

/// Which signals cancel the shutdown context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notify {
    pub signals: Vec<Signal>,
}

impl Notify {
    /// Listen for the given signals.
    pub fn new(signals: impl IntoIterator<Item = Signal>) -> Self {
        Self {
            signals: signals.into_iter().collect(),
        }
    }

    /// Do not listen for any signal; only explicit cancellation ends the
    /// foreground phase.
    pub fn none() -> Self {
        Self {
            signals: Vec::new(),
        }
    }
}

impl Default for Notify {
    fn default() -> Self {
        Self::new([Signal::Interrupt])
    }
}

type SignalFuture = futures::future::BoxFuture<'static, Signal>;

#[cfg(unix)]
fn listen(signal: Signal) -> Result<SignalFuture, GracefulError> {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let kind = match signal {
        Signal::Interrupt => SignalKind::interrupt(),
        Signal::Terminate => SignalKind::terminate(),
        Signal::Hangup => SignalKind::hangup(),
        Signal::Quit => SignalKind::quit(),
        Signal::User1 => SignalKind::user_defined1(),
        Signal::User2 => SignalKind::user_defined2(),
    };

    let mut stream =
        unix_signal(kind).map_err(|source| GracefulError::Signal { signal, source })?;

    Ok(async move {
        if stream.recv().await.is_none() {
            stopped(signal).await;
        }
        signal
    }
    .boxed())
}

/// Park a listener whose source went away so it never reports a signal
/// that did not arrive.
async fn stopped(signal: Signal) {
    warn!(%signal, "signal listener stopped");
    futures::future::pending::<()>().await
}

#[cfg(not(unix))]
fn listen(signal: Signal) -> Result<SignalFuture, GracefulError> {
    match signal {
        Signal::Interrupt => Ok(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                debug!(error = %e, "ctrl-c listener failed");
                stopped(signal).await;
            }
            signal
        }
        .boxed()),
        other => Err(GracefulError::Signal {
            signal: other,
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "signal is not available on this platform",
            ),
        }),
    }
}

/// Cancel `ctx` when any of `notify.signals` arrives.
///
/// Listeners are registered before this returns so a signal delivered right
/// after `prepare` is not lost. The listener task exits as soon as `ctx` is
/// done, whatever the cause. Returns the listener task, if one was spawned.
pub(crate) fn wire(
    ctx: &Context,
    notify: &Notify,
) -> Result<Option<JoinHandle<()>>, GracefulError> {
    if notify.signals.is_empty() {
        return Ok(None);
    }

    let listeners = notify
        .signals
        .iter()
        .map(|signal| listen(*signal))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(signals = ?notify.signals, "listening for shutdown signals");

    let ctx = ctx.clone();
    let listener = tokio::spawn(async move {
        tokio::select! {
            (signal, _, _) = select_all(listeners) => {
                info!(%signal, "received shutdown signal");
                ctx.cancel();
            }
            _ = ctx.done() => {
                debug!("shutdown signal listener exiting");
            }
        }
    });

    Ok(Some(listener))
}
