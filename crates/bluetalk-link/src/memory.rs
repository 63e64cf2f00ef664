use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluetalk_core::Latch;
use tokio::sync::mpsc;

use crate::{check_frame, Link, LinkError};

type DropFn = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// One half of an in-memory link pair. Frames written here pop out of the
/// other half's receiver; an injectable drop decision simulates radio loss.
/// Both halves share one disconnect latch, like a real session.
pub struct MemoryLink {
    tx: mpsc::Sender<Vec<u8>>,
    latch: Arc<Latch>,
    drop_outbound: Mutex<Option<DropFn>>,
}

impl MemoryLink {
    /// Installs a per-frame drop decision; `true` means the frame is
    /// silently lost after a successful write.
    pub fn set_drop_fn(&self, f: impl FnMut(&[u8]) -> bool + Send + 'static) {
        *self.drop_outbound.lock().unwrap() = Some(Box::new(f));
    }

    fn should_drop(&self, frame: &[u8]) -> bool {
        match self.drop_outbound.lock().unwrap().as_mut() {
            Some(f) => f(frame),
            None => false,
        }
    }
}

/// Builds a cross-connected pair; each side comes with the receiver for the
/// frames the other side writes.
pub fn memory_pair(capacity: usize) -> ((MemoryLink, mpsc::Receiver<Vec<u8>>), (MemoryLink, mpsc::Receiver<Vec<u8>>)) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::channel(capacity);
    let (b_to_a_tx, b_to_a_rx) = mpsc::channel(capacity);
    let latch = Arc::new(Latch::new());

    let a = MemoryLink {
        tx: a_to_b_tx,
        latch: latch.clone(),
        drop_outbound: Mutex::new(None),
    };
    let b = MemoryLink {
        tx: b_to_a_tx,
        latch,
        drop_outbound: Mutex::new(None),
    };
    ((a, b_to_a_rx), (b, a_to_b_rx))
}

#[async_trait]
impl Link for MemoryLink {
    async fn write_frame(&self, frame: &[u8]) -> Result<(), LinkError> {
        check_frame(frame)?;
        if self.latch.is_tripped() {
            return Err(LinkError::Closed);
        }
        if self.should_drop(frame) {
            return Ok(());
        }
        if self.tx.send(frame.to_vec()).await.is_err() {
            self.latch.trip();
            return Err(LinkError::WriteFailed("peer receiver dropped".into()));
        }
        Ok(())
    }

    fn disconnected(&self) -> Arc<Latch> {
        self.latch.clone()
    }

    async fn close(&self) {
        self.latch.trip();
    }
}
