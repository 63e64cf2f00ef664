//! The role-election loop. Each pass advertises for a jittered window (when
//! a peripheral backend is available), then scans for a jittered window,
//! then connects to whatever it found. Whoever connects first becomes the
//! central; the randomized windows keep two symmetric peers from phase-
//! locking.

use std::sync::Arc;
use std::time::Duration;

use bluetalk_bluez::{connect, scan_for_peer, Adapter, ScanResult};
use bluetalk_core::{uuid_str, SERVICE_NAME, SERVICE_UUID};
use bluetalk_dbus::Connection;
use bluetalk_link::{IncomingCentral, Link, LinkCentral, LinkPeripheral, PeripheralBackend};
use bluetalk_transport::ReliableTransport;
use tokio::sync::mpsc;
use tracing::debug;

use crate::jitter::Jitter;
use crate::peer::Shared;
use crate::session::ActiveSession;

const ADV_WINDOW_MS: (u64, u64) = (500, 1900);
const SCAN_WINDOW_MS: (u64, u64) = (700, 2300);
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(300);

pub(crate) struct Discovery {
    conn: Arc<Connection>,
    adapter: Adapter,
    shared: Arc<Shared>,
    transport: Arc<ReliableTransport>,
    peripheral: Option<Arc<dyn PeripheralBackend>>,
    jitter: Jitter,
}

impl Discovery {
    pub(crate) fn new(
        conn: Arc<Connection>,
        adapter: Adapter,
        shared: Arc<Shared>,
        transport: Arc<ReliableTransport>,
        peripheral: Option<Arc<dyn PeripheralBackend>>,
    ) -> Self {
        Self {
            conn,
            adapter,
            shared,
            transport,
            peripheral,
            jitter: Jitter::from_clock(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            if self.shared.is_connected() {
                if let Some(latch) = self.shared.session_latch() {
                    latch.wait().await;
                }
                self.teardown().await;
                continue;
            }

            let adv_window = self.jitter.window(ADV_WINDOW_MS.0, ADV_WINDOW_MS.1);
            let scan_window = self.jitter.window(SCAN_WINDOW_MS.0, SCAN_WINDOW_MS.1);

            if let Some(backend) = self.peripheral.clone() {
                if self.advertise_phase(backend.as_ref(), adv_window).await {
                    continue;
                }
            }

            let Some(found) = self.scan_phase(scan_window).await else {
                continue;
            };
            self.shared
                .publish_status(format!("Peer found: {}", found.addr));
            self.connect_phase(&found.addr).await;
        }
    }

    /// Advertises for up to `window`; true when an incoming central was
    /// accepted and the session installed.
    async fn advertise_phase(&self, backend: &dyn PeripheralBackend, window: Duration) -> bool {
        if let Err(err) = backend.start_advertising().await {
            self.shared
                .publish_status(format!("Advertise failed: {err}"));
            return false;
        }
        debug!(?window, "advertise phase");
        let accepted = tokio::time::timeout(window, backend.accept()).await;
        let _ = backend.stop_advertising().await;

        match accepted {
            Ok(Ok(incoming)) => {
                self.install_peripheral(incoming);
                true
            }
            Ok(Err(err)) => {
                self.shared.publish_status(format!("Accept failed: {err}"));
                false
            }
            Err(_) => false,
        }
    }

    async fn scan_phase(&self, window: Duration) -> Option<ScanResult> {
        self.shared.publish_status("Discovery: scanning");
        debug!(?window, "scan phase");
        match scan_for_peer(
            &self.conn,
            &self.adapter,
            &uuid_str(&SERVICE_UUID),
            SERVICE_NAME,
            window,
        )
        .await
        {
            Ok(found) => found,
            Err(err) => {
                self.shared.publish_status(format!("Scan error: {err}"));
                None
            }
        }
    }

    async fn connect_phase(&self, addr: &str) {
        match connect(&self.conn, &self.adapter, addr).await {
            Ok(client) => {
                let client = Arc::new(client);
                let frames = client.take_frames();
                let link = LinkCentral::new(client);
                self.shared.install(ActiveSession::Central {
                    link,
                    addr: addr.to_owned(),
                });
                self.transport.on_connected();
                if let Some(frames) = frames {
                    spawn_rx_pump(frames, self.transport.clone());
                }
                self.shared
                    .publish_status(format!("Connected as Central to {addr}"));
            }
            Err(err) => {
                self.shared.publish_status(format!("Connect failed: {err}"));
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }

    fn install_peripheral(&self, incoming: IncomingCentral) {
        let addr = incoming.addr;
        let link = LinkPeripheral::new(incoming.io);
        self.shared.install(ActiveSession::Peripheral {
            link,
            addr: addr.clone(),
        });
        self.transport.on_connected();
        spawn_rx_pump(incoming.frames, self.transport.clone());
        self.shared
            .publish_status(format!("Connected as Peripheral to {addr}"));
    }

    /// The one place sessions die: flag down, link closed, transport state
    /// flushed, and the application told.
    async fn teardown(&self) {
        if let Some(session) = self.shared.clear() {
            let addr = session.addr().to_owned();
            session.link().close().await;
            self.transport.on_disconnected();
            debug!(addr, role = session.role(), "session torn down");
            self.shared
                .publish_status(format!("Disconnected: link to {addr} closed"));
        }
    }
}

/// Forwards a session's inbound frames into the transport; dies with the
/// session when the sender side closes.
pub(crate) fn spawn_rx_pump(
    mut frames: mpsc::Receiver<Vec<u8>>,
    transport: Arc<ReliableTransport>,
) {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            transport.on_packet(&frame).await;
        }
    });
}
