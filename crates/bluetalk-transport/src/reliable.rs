//! Stop-and-wait delivery: one fragment in flight, per-fragment ACK, bounded
//! retries, and in-order reassembly keyed by message sequence id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::packet::{Packet, MAX_MESSAGE_BYTES, MAX_PAYLOAD, PACKET_ACK, PACKET_DATA};

pub const ACK_TIMEOUT: Duration = Duration::from_millis(900);
pub const MAX_RETRIES: u32 = 5;

const WRITE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Reassembly buffers idle longer than this are reaped.
const REASSEMBLY_IDLE: Duration = Duration::from_secs(120);

/// Opaque sink failure. The transport never inspects it: a failed fragment
/// write is retried after a pause, a failed ACK write is the remote
/// sender's retransmit to trigger. Sinks keep their own error types
/// (a link fault, the peer's not-connected refusal) intact underneath.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Where outgoing frames go. The peer façade implements this over whichever
/// link the current session holds; memory links implement it directly for
/// loopback tests.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn write_raw(&self, frame: &[u8]) -> Result<(), SinkError>;
}

#[async_trait]
impl FrameSink for bluetalk_link::MemoryLink {
    async fn write_raw(&self, frame: &[u8]) -> Result<(), SinkError> {
        use bluetalk_link::Link;
        self.write_frame(frame).await.map_err(Into::into)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("message too large: max {limit} bytes")]
    TooLarge { limit: usize },
    #[error("delivery timeout (seq={seq}, frag={idx})")]
    DeliveryTimeout { seq: u8, idx: u8 },
}

#[derive(Debug)]
struct RxMessage {
    total: u8,
    fragments: Vec<Option<Vec<u8>>>,
    created_at: Instant,
}

impl RxMessage {
    fn new(total: u8) -> Self {
        Self {
            total,
            fragments: vec![None; total as usize],
            created_at: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.fragments.iter().all(Option::is_some)
    }

    fn assemble(self) -> Vec<u8> {
        let mut out = Vec::new();
        for fragment in self.fragments.into_iter().flatten() {
            out.extend_from_slice(&fragment);
        }
        out
    }
}

pub struct ReliableTransport {
    sink: Arc<dyn FrameSink>,
    recv_tx: mpsc::Sender<String>,
    next_seq: AtomicU32,
    pending_acks: Mutex<HashMap<(u8, u8), mpsc::Sender<()>>>,
    reassembly: Mutex<HashMap<u8, RxMessage>>,
}

impl ReliableTransport {
    pub fn new(sink: Arc<dyn FrameSink>, recv_tx: mpsc::Sender<String>) -> Self {
        Self {
            sink,
            recv_tx,
            next_seq: AtomicU32::new(0),
            pending_acks: Mutex::new(HashMap::new()),
            reassembly: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh session: no ACK from an old session may satisfy a new wait, and
    /// no half-built message may survive. Idempotent.
    pub fn on_connected(&self) {
        self.reset();
    }

    /// Same contract as `on_connected`; dropping the pending senders makes
    /// every in-flight fragment wait observe failure.
    pub fn on_disconnected(&self) {
        self.reset();
    }

    fn reset(&self) {
        self.pending_acks.lock().unwrap().clear();
        self.reassembly.lock().unwrap().clear();
    }

    /// Fragments `text` and delivers it fragment by fragment, each gated on
    /// its ACK. Empty input is a no-op.
    pub async fn send_message(&self, text: &str) -> Result<(), TransportError> {
        let data = text.as_bytes();
        if data.is_empty() {
            return Ok(());
        }

        let total = data.len().div_ceil(MAX_PAYLOAD);
        if total > 255 {
            return Err(TransportError::TooLarge {
                limit: MAX_MESSAGE_BYTES,
            });
        }

        let mut seq = (self.next_seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % 256) as u8;
        if seq == 0 {
            seq = 1;
        }

        for (idx, chunk) in data.chunks(MAX_PAYLOAD).enumerate() {
            let idx = idx as u8;
            let frame = Packet::data(seq, total as u8, idx, chunk.to_vec()).encode();

            let mut ack_rx = self.register_ack(seq, idx);
            let mut delivered = false;
            for _ in 0..MAX_RETRIES {
                if self.sink.write_raw(&frame).await.is_err() {
                    tokio::time::sleep(WRITE_RETRY_DELAY).await;
                    continue;
                }
                match tokio::time::timeout(ACK_TIMEOUT, ack_rx.recv()).await {
                    Ok(Some(())) => delivered = true,
                    // Channel closed by session teardown, or timer elapsed:
                    // either way this attempt failed.
                    Ok(None) | Err(_) => {}
                }
                if delivered {
                    break;
                }
            }
            self.unregister_ack(seq, idx);

            if !delivered {
                return Err(TransportError::DeliveryTimeout { seq, idx });
            }
        }
        Ok(())
    }

    /// Entry point for every frame the link delivers.
    pub async fn on_packet(&self, data: &[u8]) {
        let Some(packet) = Packet::decode(data) else {
            return;
        };
        let h = packet.header;
        match h.kind {
            PACKET_ACK => self.signal_ack(h.seq, h.idx),
            PACKET_DATA => {
                // ACK first, best effort; a failed ACK write surfaces as the
                // sender's retransmit, not as our problem.
                let ack = Packet::ack(h.seq, h.total, h.idx).encode();
                let _ = self.sink.write_raw(&ack).await;
                self.accept_data(h.seq, h.total, h.idx, &packet.payload);
            }
            kind => debug!(kind, "dropping packet of unknown type"),
        }
    }

    fn register_ack(&self, seq: u8, idx: u8) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        self.pending_acks.lock().unwrap().insert((seq, idx), tx);
        rx
    }

    fn unregister_ack(&self, seq: u8, idx: u8) {
        self.pending_acks.lock().unwrap().remove(&(seq, idx));
    }

    fn signal_ack(&self, seq: u8, idx: u8) {
        let sender = self
            .pending_acks
            .lock()
            .unwrap()
            .get(&(seq, idx))
            .cloned();
        if let Some(tx) = sender {
            // Single-slot channel: a duplicate ACK finds it full and is
            // dropped.
            let _ = tx.try_send(());
        }
    }

    fn accept_data(&self, seq: u8, total: u8, idx: u8, payload: &[u8]) {
        if total == 0 || idx >= total {
            return;
        }

        let text = {
            let mut reassembly = self.reassembly.lock().unwrap();

            let now = Instant::now();
            reassembly.retain(|_, msg| now.duration_since(msg.created_at) <= REASSEMBLY_IDLE);

            let msg = reassembly
                .entry(seq)
                .and_modify(|existing| {
                    // A different total under the same seq means a new
                    // message reused the id; start over.
                    if existing.total != total {
                        *existing = RxMessage::new(total);
                    }
                })
                .or_insert_with(|| RxMessage::new(total));

            let slot = &mut msg.fragments[idx as usize];
            if slot.is_none() {
                *slot = Some(payload.to_vec());
            }

            if !msg.is_complete() {
                return;
            }
            let Some(msg) = reassembly.remove(&seq) else {
                return;
            };
            String::from_utf8_lossy(&msg.assemble()).into_owned()
        };

        if self.recv_tx.try_send(text).is_err() {
            debug!(seq, "recv stream full, message dropped");
        }
    }

    #[cfg(test)]
    fn pending_ack_count(&self) -> usize {
        self.pending_acks.lock().unwrap().len()
    }
}
