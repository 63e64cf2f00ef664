use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot edge signal: trips exactly once, observable any number of times.
///
/// Used for disconnect notification where several tasks (the sender loop, the
/// discovery machine, the notification pump) all need to see the same edge.
/// Tripping an already-tripped latch is a no-op.
#[derive(Debug, Default)]
pub struct Latch {
    tripped: AtomicBool,
    notify: Notify,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the latch. Idempotent.
    pub fn trip(&self) {
        if !self.tripped.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Waits until the latch has tripped. Returns immediately if it already
    /// has.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent trip cannot
            // slip between the load and the wait.
            notified.as_mut().enable();
            if self.tripped.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}
