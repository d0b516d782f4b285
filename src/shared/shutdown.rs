//! Cancellation signal shared by background tasks, plus OS signal handling.
//!
//! A `watch` channel carrying `true` once shutdown starts. Dropping the sender also
//! counts as cancellation.

use crate::domain::DomainError;
use std::time::Duration;
use tokio::sync::watch;

pub type CancelRx = watch::Receiver<bool>;

pub fn cancel_pair() -> (watch::Sender<bool>, CancelRx) {
    watch::channel(false)
}

pub fn is_cancelled(rx: &CancelRx) -> bool {
    *rx.borrow()
}

/// Resolves once cancellation is signalled.
pub async fn cancelled(rx: &mut CancelRx) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleeps for `d` unless cancelled first.
pub async fn sleep_or_cancel(d: Duration, rx: &mut CancelRx) -> Result<(), DomainError> {
    if is_cancelled(rx) {
        return Err(DomainError::Cancelled);
    }
    tokio::select! {
        _ = tokio::time::sleep(d) => Ok(()),
        _ = cancelled(rx) => Err(DomainError::Cancelled),
    }
}

/// Waits for Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancel() {
        let (_tx, mut rx) = cancel_pair();
        assert!(sleep_or_cancel(Duration::from_secs(10), &mut rx).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancel() {
        let (tx, mut rx) = cancel_pair();
        let handle = tokio::spawn(async move { sleep_or_cancel(Duration::from_secs(60), &mut rx).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        let res = handle.await.unwrap();
        assert!(matches!(res, Err(DomainError::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_cancelled() {
        let (tx, mut rx) = cancel_pair();
        drop(tx);
        cancelled(&mut rx).await;
    }
}
