//! Call cancellation signal.

use std::sync::Arc;

use tokio::sync::watch;

/// One-way cancellation flag shared by the transport and the call.
///
/// The transport fires it when the client cancels or the connection drops.
/// Clones share one state; once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    cancelled: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    /// Create a signal in the not-cancelled state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            cancelled: Arc::new(tx),
        }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    /// Whether the signal fired.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once the signal fires.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_sticky() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());

        signal.cancel();
        signal.cancel();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_pending_until_fired() {
        let signal = CancelSignal::new();
        let result = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_clone_wakes_waiter() {
        let signal = CancelSignal::new();
        let remote = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remote.cancel();
        });

        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .unwrap();
        // Already fired: resolves immediately.
        signal.cancelled().await;
    }
}
