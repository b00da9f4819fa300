//! Cooperative cancellation for discovery runs and monitor cycles
//!
//! A run holds a `watch::Receiver<bool>`; sending `true` stops new probes
//! from being issued while in-flight probes finish and persist.

use tokio::sync::watch;

/// Receiving side of a cancellation signal
pub type CancelReceiver = watch::Receiver<bool>;

/// Create a cancellation pair
pub fn channel() -> (watch::Sender<bool>, CancelReceiver) {
    watch::channel(false)
}

/// A receiver that is never cancelled
pub fn never() -> CancelReceiver {
    let (_tx, rx) = watch::channel(false);
    rx
}

pub(crate) fn is_cancelled(cancel: &CancelReceiver) -> bool {
    *cancel.borrow()
}

/// Resolves once cancellation is requested; pends forever if the sender is gone
pub(crate) async fn cancelled(cancel: &mut CancelReceiver) {
    if cancel.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_never_does_not_fire() {
        let mut rx = never();
        assert!(!is_cancelled(&rx));
        let mut wait = task::spawn(cancelled(&mut rx));
        assert_pending!(wait.poll());
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let (tx, mut rx) = channel();
        let mut wait = task::spawn(cancelled(&mut rx));
        assert_pending!(wait.poll());

        tx.send(true).unwrap();
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }
}
