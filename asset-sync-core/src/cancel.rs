//! Run-wide cancellation flag shared by the runner, its timeout and the CLI's Ctrl-C handler.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable, one-way cancellation signal.
///
/// Once [`cancel`](CancelSignal::cancel) is called every clone observes it,
/// and every pending [`cancelled`](CancelSignal::cancelled) future resolves.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been cancelled (immediately if it already was).
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns Ok.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
