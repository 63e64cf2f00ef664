use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluetalk_bluez::Adapter;
use bluetalk_core::Latch;
use bluetalk_dbus::Connection;
use bluetalk_link::{Link, PeripheralBackend};
use bluetalk_transport::{FrameSink, ReliableTransport, SinkError};
use tokio::sync::mpsc;

use crate::discovery::Discovery;
use crate::error::PeerError;
use crate::session::ActiveSession;

/// Depth of the `send`, `recv`, and `status` streams.
pub const CHANNEL_CAPACITY: usize = 32;

/// Application side of a peer: lines in, messages and diagnostics out.
pub struct PeerChannels {
    pub send_tx: mpsc::Sender<String>,
    pub recv_rx: mpsc::Receiver<String>,
    pub status_rx: mpsc::Receiver<String>,
}

/// Session state shared between the writer task, the discovery task, and
/// the transport's outgoing path. The atomic flag shadows the session mutex
/// so the hot send path observes disconnects without contending it.
pub(crate) struct Shared {
    connected: AtomicBool,
    session: Mutex<Option<ActiveSession>>,
    status_tx: mpsc::Sender<String>,
}

impl Shared {
    pub(crate) fn new(status_tx: mpsc::Sender<String>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            session: Mutex::new(None),
            status_tx,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Diagnostics never block and never backpressure: overflow drops.
    pub(crate) fn publish_status(&self, msg: impl Into<String>) {
        let _ = self.status_tx.try_send(msg.into());
    }

    pub(crate) fn install(&self, session: ActiveSession) {
        *self.session.lock().unwrap() = Some(session);
        self.connected.store(true, Ordering::Release);
    }

    /// Flags down first, then surrenders the session; a second caller gets
    /// `None` and does nothing.
    pub(crate) fn clear(&self) -> Option<ActiveSession> {
        self.connected.swap(false, Ordering::AcqRel);
        self.session.lock().unwrap().take()
    }

    pub(crate) fn session_latch(&self) -> Option<Arc<Latch>> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.link().disconnected())
    }

    fn session_snapshot(&self) -> Option<ActiveSession> {
        self.session.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameSink for Shared {
    async fn write_raw(&self, frame: &[u8]) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(PeerError::NotConnected.into());
        }
        let Some(session) = self.session_snapshot() else {
            return Err(PeerError::NotConnected.into());
        };
        session.link().write_frame(frame).await.map_err(Into::into)
    }
}

/// Owns the transport and the active link, runs discovery, and drains the
/// application's `send` stream.
pub struct Peer {
    conn: Arc<Connection>,
    shared: Arc<Shared>,
    transport: Arc<ReliableTransport>,
    send_rx: mpsc::Receiver<String>,
    peripheral: Option<Arc<dyn PeripheralBackend>>,
}

impl Peer {
    pub fn new(conn: Arc<Connection>) -> (Self, PeerChannels) {
        let (send_tx, send_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (recv_tx, recv_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (status_tx, status_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let shared = Arc::new(Shared::new(status_tx));
        let transport = Arc::new(ReliableTransport::new(shared.clone(), recv_tx));

        let peer = Peer {
            conn,
            shared,
            transport,
            send_rx,
            peripheral: None,
        };
        let channels = PeerChannels {
            send_tx,
            recv_rx,
            status_rx,
        };
        (peer, channels)
    }

    /// Plugs in an advertising-capable backend; without one the peer runs
    /// central-only, which is all the pure D-Bus build supports.
    pub fn with_peripheral_backend(mut self, backend: Arc<dyn PeripheralBackend>) -> Self {
        self.peripheral = Some(backend);
        self
    }

    /// Runs until the process ends: adapter setup, the writer task, then the
    /// discovery loop.
    pub async fn run(self) {
        let adapter = match Adapter::default_adapter(&self.conn).await {
            Ok(adapter) => adapter,
            Err(err) => {
                self.shared
                    .publish_status(format!("BLE setup failed: {err}"));
                return;
            }
        };
        self.shared.publish_status("BLE ready (BlueZ)");

        tokio::spawn(write_loop(
            self.send_rx,
            self.shared.clone(),
            self.transport.clone(),
        ));

        Discovery::new(
            self.conn,
            adapter,
            self.shared,
            self.transport,
            self.peripheral,
        )
        .run()
        .await;
    }
}

/// Drains `send`: silently-but-audibly drops messages while disconnected,
/// otherwise hands them to the transport one at a time.
async fn write_loop(
    mut send_rx: mpsc::Receiver<String>,
    shared: Arc<Shared>,
    transport: Arc<ReliableTransport>,
) {
    while let Some(text) = send_rx.recv().await {
        if !shared.is_connected() {
            shared.publish_status(format!("Message ignored: {}", PeerError::NotConnected));
            continue;
        }
        if let Err(err) = transport.send_message(&text).await {
            shared.publish_status(format!("Send failed: {err}"));
        }
    }
}
