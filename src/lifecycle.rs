//! Start/stop signalling for background tasks
//!
//! - `ReadinessGate`: the host opens it once fully connected; background
//!   loops wait on it before their first run.
//! - `StopSignal`: cooperative shutdown shared between the host and a loop.
//!   Work checks it at safe points instead of being aborted.
//!
//! Both are one-way latches over a `watch` channel.

use std::sync::Arc;
use tokio::sync::watch;

async fn wait_until_set(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        // Senders live as long as the latch itself
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Cloneable latch the host opens once it is ready
#[derive(Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Open the gate. Waiters are released; later waits return immediately.
    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait_ready(&self) {
        wait_until_set(self.tx.subscribe()).await;
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable cooperative stop request
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `stop` has been called
    pub async fn stopped(&self) {
        wait_until_set(self.tx.subscribe()).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
