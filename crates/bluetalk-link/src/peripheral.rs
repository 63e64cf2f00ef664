use std::sync::Arc;

use async_trait::async_trait;
use bluetalk_core::Latch;
use tokio::sync::mpsc;

use crate::{check_frame, Link, LinkError};

/// The hosted-GATT surface a peripheral backend exposes per connected
/// central: notify on the local TX characteristic, observe disconnect.
#[async_trait]
pub trait PeripheralIo: Send + Sync {
    /// Writes the local TX characteristic, notifying the subscribed central.
    async fn notify_tx(&self, frame: &[u8]) -> Result<(), LinkError>;

    fn disconnected(&self) -> Arc<Latch>;

    async fn close(&self);
}

/// An accepted incoming central: its address, the I/O handle, and the frames
/// the central writes to our RX characteristic.
pub struct IncomingCentral {
    pub addr: String,
    pub io: Arc<dyn PeripheralIo>,
    pub frames: mpsc::Receiver<Vec<u8>>,
}

/// Advertising-side seam the discovery loop drives. The pure D-Bus build
/// runs central-only; a CoreBluetooth or hosted-BlueZ backend implements
/// this to participate as a peripheral.
#[async_trait]
pub trait PeripheralBackend: Send + Sync {
    /// Advertises the BlueTalk local name and service UUID.
    async fn start_advertising(&self) -> Result<(), LinkError>;

    async fn stop_advertising(&self) -> Result<(), LinkError>;

    /// Waits for the next central to connect and subscribe.
    async fn accept(&self) -> Result<IncomingCentral, LinkError>;
}

/// Peripheral-role link over a backend-provided I/O handle.
#[derive(Clone)]
pub struct LinkPeripheral {
    io: Arc<dyn PeripheralIo>,
}

impl LinkPeripheral {
    pub fn new(io: Arc<dyn PeripheralIo>) -> Self {
        Self { io }
    }
}

#[async_trait]
impl Link for LinkPeripheral {
    async fn write_frame(&self, frame: &[u8]) -> Result<(), LinkError> {
        check_frame(frame)?;
        let latch = self.io.disconnected();
        if latch.is_tripped() {
            return Err(LinkError::Closed);
        }
        match self.io.notify_tx(frame).await {
            Ok(()) => Ok(()),
            Err(err) => {
                latch.trip();
                Err(err)
            }
        }
    }

    fn disconnected(&self) -> Arc<Latch> {
        self.io.disconnected()
    }

    async fn close(&self) {
        self.io.close().await;
    }
}
