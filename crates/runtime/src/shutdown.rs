use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::debug;

/// A `ShutdownSignal` resolves once the process receives SIGINT or SIGTERM.
///
/// Hand it to a poller as its cancellation future.
pub struct ShutdownSignal {
    /// A stream of SIGINT signals.
    int_signal: Signal,
    /// A stream of SIGTERM signals.
    term_signal: Signal,
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal").finish_non_exhaustive()
    }
}

impl ShutdownSignal {
    /// Install the signal handlers. Must be called from within a Tokio runtime.
    ///
    /// Both handlers are registered before this returns, so a signal that
    /// arrives before the first poll is still observed.
    pub fn new() -> io::Result<Self> {
        let int_signal = signal(SignalKind::interrupt())?;
        let term_signal = signal(SignalKind::terminate())?;

        Ok(Self { int_signal, term_signal })
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.int_signal.poll_recv(cx).is_ready() {
            debug!("Received SIGINT signal");
            return Poll::Ready(());
        }

        if this.term_signal.poll_recv(cx).is_ready() {
            debug!("Received SIGTERM signal");
            return Poll::Ready(());
        }

        Poll::Pending
    }
}
