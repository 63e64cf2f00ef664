//! Role-neutral link layer: opaque frames of at most `BLE_MTU` bytes, a
//! one-shot disconnect edge, and nothing else. The central implementation
//! rides the BlueZ client; the peripheral side is a seam other backends plug
//! into. An in-memory pair with fault injection backs the loss tests.

mod central;
mod memory;
mod peripheral;

pub use central::LinkCentral;
pub use memory::{memory_pair, MemoryLink};
pub use peripheral::{IncomingCentral, LinkPeripheral, PeripheralBackend, PeripheralIo};

use std::sync::Arc;

use async_trait::async_trait;
use bluetalk_core::Latch;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("frame of {0} bytes exceeds the link mtu")]
    FrameTooLarge(usize),
    #[error("link closed")]
    Closed,
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// One BLE data channel, independent of who initiated the connection.
///
/// A failed `write_frame` trips the disconnect latch before returning; the
/// session owner observes the edge and tears down.
#[async_trait]
pub trait Link: Send + Sync {
    async fn write_frame(&self, frame: &[u8]) -> Result<(), LinkError>;

    /// The one-shot disconnect edge for this link.
    fn disconnected(&self) -> Arc<Latch>;

    /// Idempotent local teardown.
    async fn close(&self);
}

pub(crate) fn check_frame(frame: &[u8]) -> Result<(), LinkError> {
    if frame.is_empty() || frame.len() > bluetalk_core::BLE_MTU {
        return Err(LinkError::FrameTooLarge(frame.len()));
    }
    Ok(())
}
