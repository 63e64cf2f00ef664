//! End-to-end transport scenarios over an in-memory link pair: exact wire
//! shapes for small messages, loss recovery, and size limits.

use std::sync::Arc;

use bluetalk_link::{memory_pair, MemoryLink};
use bluetalk_transport::{
    Packet, ReliableTransport, TransportError, MAX_MESSAGE_BYTES, PACKET_ACK, PACKET_DATA,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

struct Endpoint {
    transport: Arc<ReliableTransport>,
    link: Arc<MemoryLink>,
    recv: mpsc::Receiver<String>,
    /// Every frame this endpoint's pump handed to its transport.
    seen: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Two transports wired across one memory pair, each with a pump task that
/// taps the frames it forwards.
fn loopback() -> (Endpoint, Endpoint) {
    let ((link_a, rx_a), (link_b, rx_b)) = memory_pair(64);
    let (a, b) = (Arc::new(link_a), Arc::new(link_b));
    (endpoint(a, rx_a), endpoint(b, rx_b))
}

fn endpoint(link: Arc<MemoryLink>, mut inbound: mpsc::Receiver<Vec<u8>>) -> Endpoint {
    let (recv_tx, recv) = mpsc::channel(32);
    let transport = Arc::new(ReliableTransport::new(link.clone(), recv_tx));
    let (seen_tx, seen) = mpsc::unbounded_channel();
    {
        let transport = transport.clone();
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let _ = seen_tx.send(frame.clone());
                transport.on_packet(&frame).await;
            }
        });
    }
    Endpoint {
        transport,
        link,
        recv,
        seen,
    }
}

fn drain(seen: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while let Ok(frame) = seen.try_recv() {
        out.push(frame);
    }
    out
}

#[tokio::test]
async fn tiny_message_is_one_data_one_ack() {
    let (a, mut b) = loopback();
    a.transport.send_message("hi").await.expect("delivery");
    assert_eq!(b.recv.recv().await.as_deref(), Some("hi"));

    let at_b = drain(&mut b.seen);
    assert_eq!(at_b, vec![vec![PACKET_DATA, 1, 1, 0, b'h', b'i']]);
}

#[tokio::test]
async fn exact_payload_boundary_stays_single_fragment() {
    let (a, mut b) = loopback();
    let text = "A".repeat(16);
    a.transport.send_message(&text).await.expect("delivery");
    assert_eq!(b.recv.recv().await.as_deref(), Some(text.as_str()));

    let at_b = drain(&mut b.seen);
    assert_eq!(at_b.len(), 1);
    assert_eq!(&at_b[0][..4], &[PACKET_DATA, 1, 1, 0]);
    assert_eq!(at_b[0].len(), 20);
}

#[tokio::test]
async fn one_byte_past_the_boundary_takes_two_fragments() {
    let (mut a, mut b) = loopback();
    let text = "A".repeat(17);
    a.transport.send_message(&text).await.expect("delivery");
    assert_eq!(b.recv.recv().await.as_deref(), Some(text.as_str()));

    let at_b = drain(&mut b.seen);
    assert_eq!(at_b.len(), 2);
    assert_eq!(&at_b[0][..4], &[PACKET_DATA, 1, 2, 0]);
    assert_eq!(&at_b[1][..4], &[PACKET_DATA, 1, 2, 1]);
    assert_eq!(at_b[1].len(), 5);

    let at_a = drain(&mut a.seen);
    assert_eq!(
        at_a,
        vec![
            Packet::ack(1, 2, 0).encode(),
            Packet::ack(1, 2, 1).encode()
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn lost_ack_triggers_one_retransmit_and_single_delivery() {
    let (a, mut b) = loopback();

    // Drop exactly the first ACK leaving b.
    let mut dropped = false;
    b.link.set_drop_fn(move |frame| {
        if frame[0] == PACKET_ACK && !dropped {
            dropped = true;
            return true;
        }
        false
    });

    a.transport.send_message("payload").await.expect("delivery");
    assert_eq!(b.recv.recv().await.as_deref(), Some("payload"));

    let at_b = drain(&mut b.seen);
    assert_eq!(at_b.len(), 2, "fragment 0 must be retransmitted once");
    assert_eq!(at_b[0], at_b[1]);
    assert!(b.recv.try_recv().is_err(), "no duplicate delivery");
}

#[tokio::test]
async fn max_size_message_round_trips_in_255_fragments() {
    let (a, mut b) = loopback();
    let text = "x".repeat(MAX_MESSAGE_BYTES);
    a.transport.send_message(&text).await.expect("delivery");
    assert_eq!(b.recv.recv().await.as_deref(), Some(text.as_str()));

    let at_b = drain(&mut b.seen);
    assert_eq!(at_b.len(), 255);
    assert_eq!(&at_b[254][..4], &[PACKET_DATA, 1, 255, 254]);
}

#[tokio::test]
async fn oversize_message_emits_no_packets() {
    let (a, mut b) = loopback();
    let text = "x".repeat(MAX_MESSAGE_BYTES + 1);
    let err = a.transport.send_message(&text).await.unwrap_err();
    assert!(matches!(err, TransportError::TooLarge { .. }));

    // Give the pump a chance to have seen anything at all.
    tokio::task::yield_now().await;
    assert!(drain(&mut b.seen).is_empty());
}

#[tokio::test(start_paused = true)]
async fn lossy_data_path_still_delivers_every_message() {
    let (a, mut b) = loopback();

    // 10% loss on DATA frames only; ACKs always pass.
    let mut rng = StdRng::seed_from_u64(0x0b1e7a1c);
    a.link.set_drop_fn(move |frame| {
        frame[0] == PACKET_DATA && rng.gen_bool(0.10)
    });

    let text = "lossy-".repeat(100); // 600 bytes, 38 fragments
    a.transport.send_message(&text).await.expect("delivery");
    assert_eq!(b.recv.recv().await.as_deref(), Some(text.as_str()));
    assert!(b.recv.try_recv().is_err());
}

#[tokio::test]
async fn assorted_sizes_round_trip_identically() {
    let (a, mut b) = loopback();
    for len in [1usize, 15, 16, 17, 31, 32, 33, 100, 1000] {
        let text: String = ('a'..='z').cycle().take(len).collect();
        a.transport.send_message(&text).await.expect("delivery");
        assert_eq!(b.recv.recv().await.as_deref(), Some(text.as_str()));
    }
}

#[tokio::test(start_paused = true)]
async fn dead_link_ends_in_delivery_timeout() {
    let (a, _b) = loopback();
    a.link.set_drop_fn(|frame| frame[0] == PACKET_DATA);

    let err = a.transport.send_message("anyone there?").await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::DeliveryTimeout { idx: 0, .. }
    ));
}
