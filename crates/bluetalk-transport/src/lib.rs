//! Reliable text delivery over an at-most-once, possibly-dropping 20-byte
//! frame link: fragmentation into 16-byte payloads, per-fragment ACK with
//! stop-and-wait retry, and reassembly with stale-buffer reaping.

pub mod packet;
mod reliable;

pub use packet::{Packet, PacketHeader, HEADER_LEN, MAX_MESSAGE_BYTES, MAX_PAYLOAD, PACKET_ACK, PACKET_DATA};
pub use reliable::{FrameSink, ReliableTransport, SinkError, TransportError, ACK_TIMEOUT, MAX_RETRIES};
