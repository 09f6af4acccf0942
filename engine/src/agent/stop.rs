//! Cooperative stop signal
//!
//! Checked by the loop at iteration boundaries and raced by the kernel against
//! a running handler. Once raised it stays raised.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Unreachable while `self` holds the sender
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_starts_unstopped() {
        assert!(!StopSignal::new().is_stopped());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let signal = StopSignal::new();
        let clone = signal.clone();

        let waiter = tokio::spawn(async move { clone.stopped().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.stop();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_resolves_immediately_when_already_raised() {
        let signal = StopSignal::new();
        signal.stop();
        signal.stop();
        tokio::time::timeout(Duration::from_millis(100), signal.stopped())
            .await
            .unwrap();
    }
}
