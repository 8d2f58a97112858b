mod common;

use common::ChunkedConn;
use proptest::prelude::*;
use tlstun_shared::proto::framing::{FramedChannel, MTU, PacketBuffer};
use tlstun_shared::tunnel::TunnelError;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn roundtrip_over_single_byte_stream(payload in proptest::collection::vec(any::<u8>(), 0..=MTU)) {
        let received = runtime().block_on(async {
            let (a, b) = ChunkedConn::pair(1);
            let mut tx = FramedChannel::new(a);
            let mut rx = FramedChannel::new(b);

            tx.send_packet(&payload).await.unwrap();

            let mut buf = PacketBuffer::new();
            let n = rx.receive_packet(&mut buf).await.unwrap();
            assert_eq!(n, payload.len());
            buf.packet().to_vec()
        });
        prop_assert_eq!(received, payload);
    }

    #[test]
    fn sequence_survives_odd_chunking(
        packets in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..8),
        chunk in 1usize..7,
    ) {
        let received = runtime().block_on(async {
            let (a, b) = ChunkedConn::pair(chunk);
            let mut tx = FramedChannel::new(a);
            let mut rx = FramedChannel::new(b);

            for p in &packets {
                tx.send_packet(p).await.unwrap();
            }

            let mut out = Vec::new();
            let mut buf = PacketBuffer::new();
            for _ in 0..packets.len() {
                rx.receive_packet(&mut buf).await.unwrap();
                out.push(buf.packet().to_vec());
            }
            out
        });
        prop_assert_eq!(received, packets);
    }
}

async fn receive_after_raw(bytes: &[u8]) -> (Result<usize, TunnelError>, PacketBuffer) {
    let (mut peer, local) = ChunkedConn::pair(1);
    peer.write_raw(bytes).await;
    drop(peer);

    let mut rx = FramedChannel::new(local);
    let mut buf = PacketBuffer::new();
    let result = rx.receive_packet(&mut buf).await;
    (result, buf)
}

#[tokio::test]
async fn prefix_2001_is_rejected() {
    let mut bytes = vec![0x07, 0xD1];
    bytes.extend(std::iter::repeat(0xEE).take(2001));

    let (result, buf) = receive_after_raw(&bytes).await;
    assert!(matches!(
        result,
        Err(TunnelError::FrameTooLarge { size: 2001, max: MTU })
    ));
    assert!(buf.is_empty());
}

#[tokio::test]
async fn prefix_65535_is_rejected() {
    let (result, buf) = receive_after_raw(&[0xFF, 0xFF, 1, 2, 3]).await;
    assert!(matches!(
        result,
        Err(TunnelError::FrameTooLarge { size: 65535, max: MTU })
    ));
    assert!(buf.is_empty());
}

#[tokio::test]
async fn prefix_2000_is_accepted() {
    let mut bytes = vec![0x07, 0xD0];
    bytes.extend(std::iter::repeat(0x5A).take(MTU));

    let (result, buf) = receive_after_raw(&bytes).await;
    assert_eq!(result.unwrap(), MTU);
    assert!(buf.packet().iter().all(|b| *b == 0x5A));
}

#[tokio::test]
async fn close_mid_payload_is_peer_closed() {
    // Announces 10 bytes, delivers 3, then the stream ends.
    let (result, _) = receive_after_raw(&[0x00, 0x0A, 1, 2, 3]).await;
    assert!(matches!(result, Err(TunnelError::PeerClosed)));
}

#[tokio::test]
async fn idle_stream_is_not_closed() {
    let (_peer, local) = ChunkedConn::pair(1);
    let mut rx = FramedChannel::new(local);
    let mut buf = PacketBuffer::new();

    let pending = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        rx.receive_packet(&mut buf),
    )
    .await;
    assert!(pending.is_err(), "idle stream must block, not report closure");
    assert!(!rx.is_broken());
}

#[tokio::test]
async fn abandoned_receive_resumes_mid_frame() {
    let (mut peer, local) = ChunkedConn::pair(1);
    let mut rx = FramedChannel::new(local);
    let mut buf = PacketBuffer::new();

    // Prefix and part of the payload arrive, then the reader gives up.
    peer.write_raw(&[0x00, 0x04, b'a', b'b']).await;
    let first = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        rx.receive_packet(&mut buf),
    )
    .await;
    assert!(first.is_err());

    peer.write_raw(b"cd").await;
    let n = rx.receive_packet(&mut buf).await.unwrap();
    assert_eq!(n, 4);
    assert_eq!(buf.packet(), b"abcd");
}
