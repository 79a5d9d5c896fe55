//! Shutdown signal shared by long-running loops

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Receiving end of the process shutdown broadcast
///
/// Once observed the signal stays triggered. A closed or lagged channel counts
/// as shutdown.
pub struct ShutdownSignal {
    rx: broadcast::Receiver<()>,
    triggered: bool,
}

impl ShutdownSignal {
    pub fn new(rx: broadcast::Receiver<()>) -> Self {
        Self {
            rx,
            triggered: false,
        }
    }

    /// New broadcast channel with one subscribed signal
    pub fn channel() -> (broadcast::Sender<()>, Self) {
        let (tx, rx) = broadcast::channel(1);
        (tx, Self::new(rx))
    }

    /// Check without waiting
    pub fn is_triggered(&mut self) -> bool {
        if !self.triggered {
            self.triggered = !matches!(self.rx.try_recv(), Err(TryRecvError::Empty));
        }
        self.triggered
    }

    /// Wait for shutdown; cancel-safe
    pub async fn recv(&mut self) {
        if !self.triggered {
            let _ = self.rx.recv().await;
            self.triggered = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_latches() {
        let (tx, mut signal) = ShutdownSignal::channel();
        assert!(!signal.is_triggered());
        tx.send(()).unwrap();
        assert!(signal.is_triggered());
        assert!(signal.is_triggered());
        tokio::time::timeout(Duration::from_millis(50), signal.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_channel_is_shutdown() {
        let (tx, mut signal) = ShutdownSignal::channel();
        drop(tx);
        assert!(signal.is_triggered());
    }
}
