//! One-way shutdown latch shared between the client and its background tasks.
//!
//! A [`Shutdown`] flips from "running" to "triggered" exactly once. Any number
//! of [`ShutdownSignal`]s can wait for that transition. Dropping the
//! `Shutdown` without triggering it also releases the waiters, so a task
//! whose owner went away still exits.

use tokio::sync::watch;

/// Trigger side of the latch.
#[derive(Debug)]
pub(crate) struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Trigger the latch. Returns `true` only for the first trigger.
    pub(crate) fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub(crate) fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Wait side of the latch.
#[derive(Debug, Clone)]
pub(crate) struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once the latch is triggered or its `Shutdown` is dropped.
    pub(crate) async fn recv(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
