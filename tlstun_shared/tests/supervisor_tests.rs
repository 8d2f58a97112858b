mod common;

use common::{ChunkedConn, MockDevice, packet, write_identity};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tlstun_shared::engine::Operation;
use tlstun_shared::proto::framing::{FramedChannel, PacketBuffer};
use tlstun_shared::supervisor::{RetryPolicy, run_client, serve_one};
use tlstun_shared::tunnel::{SecureTunnel, TlsSettings, TunnelError};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn client_retries_until_connect_succeeds() {
    let (mut device, _handle) = MockDevice::new();
    let policy = RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(20),
    };
    let calls = Arc::new(AtomicU32::new(0));
    let mut stamps = Vec::new();

    let started = Instant::now();
    let counter = calls.clone();
    let outcome = timeout(
        WAIT,
        run_client(&mut device, &policy, |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            stamps.push(Instant::now());
            async move {
                if attempt < 3 {
                    return Err(TunnelError::UnreachableHost(format!("attempt {attempt}")));
                }
                // Peer hangs up straight away, ending the session.
                let (local, _remote) = ChunkedConn::pair(64);
                Ok(local)
            }
        }),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.sessions, 1);
    let report = outcome.last_session.unwrap();
    assert_eq!(report.operation, Operation::ChannelReceive);
    assert!(matches!(report.error, TunnelError::PeerClosed));

    assert!(started.elapsed() >= Duration::from_millis(40));
    for pair in stamps.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(20));
    }
}

#[tokio::test]
async fn client_gives_up_after_max_attempts() {
    let (mut device, _handle) = MockDevice::new();
    let policy = RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(5),
    };
    let calls = Arc::new(AtomicU32::new(0));

    let counter = calls.clone();
    let err = run_client(&mut device, &policy, |attempt| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            Err::<ChunkedConn, _>(TunnelError::HandshakeFailed(format!("attempt {attempt}")))
        }
    })
    .await
    .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match err {
        TunnelError::HandshakeFailed(msg) => assert_eq!(msg, "attempt 3"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn client_reconnects_after_session_ends() {
    let (mut device, _handle) = MockDevice::new();
    let policy = RetryPolicy {
        max_attempts: 2,
        delay: Duration::from_millis(5),
    };

    let outcome = run_client(&mut device, &policy, |_| async {
        let (local, _remote) = ChunkedConn::pair(64);
        Ok::<_, TunnelError>(local)
    })
    .await
    .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.sessions, 2);
}

#[tokio::test]
async fn server_serves_one_client_then_stops() {
    let dir = tempdir().unwrap();
    let server_id = write_identity(&dir, "server");

    let mut server = SecureTunnel::new(TlsSettings::new_server(
        &server_id.cert_path,
        &server_id.key_path,
    ));
    server
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();

    let (mut device, mut handle) = MockDevice::new();
    for i in 0..3u8 {
        handle.inject.send(packet(0x30 + i, 100 + i as usize)).unwrap();
    }

    let client_task = tokio::spawn(async move {
        let mut tunnel = SecureTunnel::new(TlsSettings::new_client());
        tunnel.connect("localhost", port).await.unwrap();
        let mut channel = FramedChannel::new(tunnel);
        let mut buf = PacketBuffer::new();

        for i in 0..3u8 {
            channel.send_packet(&packet(0x70 + i, 200 + i as usize)).await.unwrap();
        }
        let mut received = Vec::new();
        for _ in 0..3 {
            channel.receive_packet(&mut buf).await.unwrap();
            received.push(buf.packet().to_vec());
        }
        channel.close().await.unwrap();
        received
    });

    let report = timeout(WAIT, serve_one(&mut device, server))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.packets_sent(), 3);
    assert_eq!(report.packets_received(), 3);
    assert_eq!(report.operation, Operation::ChannelReceive);
    assert!(matches!(report.error, TunnelError::PeerClosed));

    let received = client_task.await.unwrap();
    assert_eq!(
        received,
        (0..3u8).map(|i| packet(0x30 + i, 100 + i as usize)).collect::<Vec<_>>()
    );
    for i in 0..3u8 {
        assert_eq!(
            handle.written.recv().await.unwrap(),
            packet(0x70 + i, 200 + i as usize)
        );
    }

    // Nobody is listening any more.
    let mut late = SecureTunnel::new(TlsSettings::new_client());
    let err = late.connect("127.0.0.1", port).await.unwrap_err();
    assert!(matches!(err, TunnelError::UnreachableHost(_)));
}
