use std::sync::Arc;

use async_trait::async_trait;
use bluetalk_bluez::CentralClient;
use bluetalk_core::Latch;

use crate::{check_frame, Link, LinkError};

/// Central-role link: writes go out as write-without-response on the peer's
/// RX characteristic; inbound frames arrive via the client's notification
/// queue.
#[derive(Clone)]
pub struct LinkCentral {
    client: Arc<CentralClient>,
}

impl LinkCentral {
    pub fn new(client: Arc<CentralClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<CentralClient> {
        &self.client
    }
}

#[async_trait]
impl Link for LinkCentral {
    async fn write_frame(&self, frame: &[u8]) -> Result<(), LinkError> {
        check_frame(frame)?;
        let latch = self.client.disconnected();
        if latch.is_tripped() {
            return Err(LinkError::Closed);
        }
        match self.client.write_no_response(frame).await {
            Ok(()) => Ok(()),
            Err(err) => {
                latch.trip();
                Err(LinkError::WriteFailed(err.to_string()))
            }
        }
    }

    fn disconnected(&self) -> Arc<Latch> {
        self.client.disconnected()
    }

    async fn close(&self) {
        self.client.close().await;
    }
}
