//! The 4-byte packet header riding every BLE frame:
//! `[type, seq, total, idx]` followed by up to 16 payload bytes.

use bluetalk_core::BLE_MTU;

pub const PACKET_DATA: u8 = 0x01;
pub const PACKET_ACK: u8 = 0x02;

pub const HEADER_LEN: usize = 4;

/// Payload bytes per fragment.
pub const MAX_PAYLOAD: usize = BLE_MTU - HEADER_LEN;

/// Largest message that fits in 255 fragments.
pub const MAX_MESSAGE_BYTES: usize = MAX_PAYLOAD * 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: u8,
    /// Message sequence id, 1..=255 (0 is never assigned).
    pub seq: u8,
    /// Fragments in the message; echoed informationally on ACKs.
    pub total: u8,
    /// Fragment index, 0..total.
    pub idx: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn data(seq: u8, total: u8, idx: u8, payload: Vec<u8>) -> Self {
        Self {
            header: PacketHeader {
                kind: PACKET_DATA,
                seq,
                total,
                idx,
            },
            payload,
        }
    }

    pub fn ack(seq: u8, total: u8, idx: u8) -> Self {
        Self {
            header: PacketHeader {
                kind: PACKET_ACK,
                seq,
                total,
                idx,
            },
            payload: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.header.kind);
        out.push(self.header.seq);
        out.push(self.header.total);
        out.push(self.header.idx);
        out.extend_from_slice(&self.payload);
        out
    }

    /// `None` when the buffer is shorter than a header.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            header: PacketHeader {
                kind: bytes[0],
                seq: bytes[1],
                total: bytes[2],
                idx: bytes[3],
            },
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }
}
