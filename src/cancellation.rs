//! Cooperative cancellation, checked at every suspension point (§5).
//!
//! Built on `tokio::sync::watch` rather than a dedicated cancellation crate,
//! consistent with the rest of the dependency stack.

use tokio::sync::watch;

#[derive(Debug)]
pub struct CancellationToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// A cloneable handle sharing this token's cancellation state.
    pub fn child(&self) -> CancellationToken {
        CancellationToken { tx: self.tx.clone(), rx: self.rx.clone() }
    }

    /// Suspend until cancellation is signalled. Returns immediately if
    /// already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CancellationToken {
    fn clone(&self) -> Self {
        self.child()
    }
}
