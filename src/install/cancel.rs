//! Cancellation signal shared by the whole install call graph
//!
//! Backed by a `tokio::sync::watch` channel: the [`CancelHandle`] flips the
//! value once, every cloned [`CancellationToken`] observes it.

use crate::error::{InstallError, InstallResult};
use tokio::sync::watch;

/// Sending half; firing it cancels every token created alongside it
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, cheap to clone and pass by value
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle/token pair
pub fn cancellation() -> (CancelHandle, CancellationToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancellationToken { rx })
}

impl CancellationToken {
    /// A token that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Return `Err(Canceled)` if cancellation was requested
    pub fn check(&self) -> InstallResult<()> {
        if self.is_cancelled() {
            Err(InstallError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is requested.
    ///
    /// Pends forever when the handle was dropped without firing.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
