//! Cooperative shutdown for worker loops.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Shared flag that tells worker loops to stop.
///
/// Workers check it between polls only. A poll or handler that is already
/// running finishes normally; nothing is cancelled mid-flight.
///
/// # Examples
///
/// ```rust
/// use couponq::jobs::ShutdownSignal;
///
/// # #[tokio::main]
/// # async fn main() {
/// let signal = ShutdownSignal::new();
/// let worker_view = signal.clone();
///
/// signal.trigger();
/// assert!(worker_view.is_triggered());
/// worker_view.triggered().await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    state: Arc<ShutdownState>,
}

#[derive(Debug)]
struct ShutdownState {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Create an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            state: Arc::new(ShutdownState { tx, rx }),
        }
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.state.rx.borrow()
    }

    /// Request shutdown for every clone of this signal.
    pub fn trigger(&self) {
        let _ = self.state.tx.send(true);
        debug!("Shutdown requested");
    }

    /// Wait until shutdown is requested.
    pub async fn triggered(&self) {
        let mut rx = self.state.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
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
    fn test_new_signal_is_not_triggered() {
        assert!(!ShutdownSignal::new().is_triggered());
    }

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.triggered().await });

        tokio::task::yield_now().await;
        signal.trigger();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter woke")
            .expect("task joined");
        assert!(signal.is_triggered());
    }
}
