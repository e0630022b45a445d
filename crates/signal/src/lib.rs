#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! A single shutdown signal, fanned out to every task in the pipeline.
//!
//! A [`Shutdown`] is created once by the process's control surface; each
//! task is handed a cloned [`ShutdownHandle`] and races [`ShutdownHandle::signalled`]
//! against its own work (a collector's timer tick, the queue's ingress
//! channel, the sender's retry sleep). Tripping the [`Shutdown`] wakes every
//! handle at once.

use std::time::Duration;

use tokio::sync::watch;

/// The sending half of the shutdown signal, held by the process's control
/// surface.
#[derive(Clone)]
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

/// The receiving half of the shutdown signal, held by every task.
#[derive(Clone)]
pub struct ShutdownHandle {
    receiver: watch::Receiver<bool>,
}

/// Creates a new shutdown signal, returning the sender and one initial
/// handle. Further handles are obtained with [`Shutdown::handle`].
pub fn channel() -> (Shutdown, ShutdownHandle) {
    let (sender, receiver) = watch::channel(false);
    (Shutdown { sender }, ShutdownHandle { receiver })
}

impl Shutdown {
    /// Returns a new handle that observes this shutdown signal.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            receiver: self.sender.subscribe(),
        }
    }

    /// Trips the signal. Every outstanding and future handle observes it.
    pub fn trigger(&self) {
        tracing::info!("shutdown signal triggered");
        // No receivers left is not an error: every task may have already exited.
        let _ = self.sender.send(true);
    }
}

impl ShutdownHandle {
    /// Returns `true` if the signal has already tripped.
    pub fn is_signalled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the signal trips. If it has already tripped, resolves
    /// immediately.
    pub async fn signalled(&mut self) {
        if self.is_signalled() {
            return;
        }
        // The sender is only dropped once the Shutdown itself is dropped,
        // which happens during process teardown; treat that as signalled too.
        while self.receiver.changed().await.is_ok() {
            if *self.receiver.borrow() {
                return;
            }
        }
    }

    /// Races `duration` against the shutdown signal. Returns `true` if the
    /// signal tripped first.
    pub async fn sleep_or_signalled(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            () = self.signalled() => true,
        }
    }
}
