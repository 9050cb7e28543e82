#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

use std::convert::Infallible;
use tokio::sync::{mpsc, watch};

/// Creates a drain channel.
///
/// The `Signal` is used to start a drain, and the `Watch` will be notified
/// when a drain is signaled.
pub fn channel() -> (Signal, Watch) {
    let (tx, rx) = watch::channel(());
    let (drained_tx, drained_rx) = mpsc::channel(1);

    (Signal { drained_rx, tx }, Watch { drained_tx, rx })
}

/// Send a drain command to all watchers.
#[derive(Debug)]
pub struct Signal {
    drained_rx: mpsc::Receiver<Infallible>,
    tx: watch::Sender<()>,
}

/// Watch for a drain command.
///
/// All clones of a `Watch` are counted against the same drain; the drain
/// completes when every clone has been dropped or released.
#[derive(Clone, Debug)]
pub struct Watch {
    drained_tx: mpsc::Sender<Infallible>,
    rx: watch::Receiver<()>,
}

#[must_use = "ReleaseShutdown should be dropped explicitly to release the runtime"]
#[derive(Clone, Debug)]
pub struct ReleaseShutdown(mpsc::Sender<Infallible>);

// === impl Signal ===

impl Signal {
    /// Start the draining process.
    ///
    /// A signal is sent to all futures watching for the signal. This resolves
    /// when all watchers have completed.
    pub async fn drain(mut self) {
        drop(self.tx);
        // The sender half is held (transitively) by every watcher; the
        // channel yields `None` only once all of them have dropped it.
        match self.drained_rx.recv().await {
            None => {}
            Some(n) => match n {},
        }
    }
}

// === impl Watch ===

impl Watch {
    /// Returns a `ReleaseShutdown` handle after the drain has been signaled.
    /// The handle must be dropped when a shutdown action has been completed
    /// to unblock graceful shutdown.
    pub async fn signaled(mut self) -> ReleaseShutdown {
        let _ = self.rx.changed().await;
        ReleaseShutdown(self.drained_tx)
    }

    /// Return a `ReleaseShutdown` handle immediately, ignoring the signal.
    ///
    /// This is intended to allow a task to block shutdown until it completes.
    pub fn ignore_signaled(self) -> ReleaseShutdown {
        drop(self.rx);
        ReleaseShutdown(self.drained_tx)
    }

    /// Wrap a future and a callback that is triggered when drain is received.
    ///
    /// The callback receives a mutable reference to the original future, and
    /// should be used to trigger any shutdown process for it.
    pub async fn watch<A, F>(self, mut future: A, on_drain: F) -> A::Output
    where
        A: std::future::Future + Unpin,
        F: FnOnce(&mut A),
    {
        tokio::select! {
            res = &mut future => res,
            shutdown = self.signaled() => {
                on_drain(&mut future);
                shutdown.release_after(future).await
            }
        }
    }
}

// === impl ReleaseShutdown ===

impl ReleaseShutdown {
    /// Releases shutdown after `future` completes.
    pub async fn release_after<F: std::future::Future>(self, future: F) -> F::Output {
        let res = future.await;
        drop(self.0);
        res
    }
}
