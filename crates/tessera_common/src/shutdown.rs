//! Cooperative shutdown signal shared by the listener and every session.
//!
//! Built on a `tokio::sync::watch` channel so async tasks can both poll the
//! flag cheaply and await the transition.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create a new signal in the non-shutdown state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal shutdown. Wakes all subscribers immediately.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Check if shutdown has been requested (non-blocking).
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe for await-style notification.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Await the shutdown transition.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_not_shutdown() {
        assert!(!ShutdownSignal::new().is_shutdown());
    }

    #[test]
    fn clone_shares_state() {
        let a = ShutdownSignal::new();
        let b = a.clone();
        a.shutdown();
        assert!(b.is_shutdown());
    }

    #[tokio::test]
    async fn wait_wakes_on_shutdown() {
        let sig = ShutdownSignal::new();
        let sig2 = sig.clone();
        let waiter = tokio::spawn(async move { sig2.wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        sig.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_down() {
        let sig = ShutdownSignal::new();
        sig.shutdown();
        tokio::time::timeout(Duration::from_millis(100), sig.wait())
            .await
            .expect("should not block");
    }
}
