#![allow(dead_code)]

use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use tempfile::TempDir;
use tlstun_shared::device::PacketDevice;
use tlstun_shared::transport::Connection;
use tlstun_shared::tunnel::TunnelResult;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// In-memory stream that moves at most `max_chunk` bytes per call.
pub struct ChunkedConn {
    stream: DuplexStream,
    max_chunk: usize,
    closed: bool,
}

impl ChunkedConn {
    pub fn pair(max_chunk: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            ChunkedConn {
                stream: a,
                max_chunk,
                closed: false,
            },
            ChunkedConn {
                stream: b,
                max_chunk,
                closed: false,
            },
        )
    }

    /// Write raw bytes, bypassing framing.
    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }
}

#[async_trait]
impl Connection for ChunkedConn {
    async fn send_data(&mut self, data: &[u8]) -> TunnelResult<usize> {
        let n = data.len().min(self.max_chunk);
        Ok(self.stream.write(&data[..n]).await?)
    }

    async fn flush(&mut self) -> TunnelResult<()> {
        Ok(self.stream.flush().await?)
    }

    async fn recv_data(&mut self, buf: &mut [u8]) -> TunnelResult<usize> {
        let n = buf.len().min(self.max_chunk);
        Ok(self.stream.read(&mut buf[..n]).await?)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    async fn close(&mut self) -> TunnelResult<()> {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.shutdown().await;
        }
        Ok(())
    }
}

/// Channel-backed packet device.
///
/// Packets pushed through the handle come out of `read_packet`; an empty
/// packet or a dropped handle reads as zero bytes. Everything written to the
/// device shows up on `written`.
pub struct MockDevice {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    written: mpsc::UnboundedSender<Vec<u8>>,
}

pub struct MockDeviceHandle {
    pub inject: mpsc::UnboundedSender<Vec<u8>>,
    pub written: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MockDevice {
    pub fn new() -> (Self, MockDeviceHandle) {
        let (inject, incoming) = mpsc::unbounded_channel();
        let (written_tx, written) = mpsc::unbounded_channel();
        (
            MockDevice {
                incoming,
                written: written_tx,
            },
            MockDeviceHandle { inject, written },
        )
    }
}

#[async_trait]
impl PacketDevice for MockDevice {
    async fn read_packet(&mut self, buf: &mut [u8]) -> TunnelResult<usize> {
        match self.incoming.recv().await {
            Some(packet) => {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(packet.len())
            }
            None => Ok(0),
        }
    }

    async fn write_packet(&mut self, packet: &[u8]) -> TunnelResult<()> {
        let _ = self.written.send(packet.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock0"
    }
}

/// A self-signed certificate for `localhost` written out as PEM files.
pub struct TestIdentity {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

pub fn write_identity(dir: &TempDir, prefix: &str) -> TestIdentity {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_path = dir.path().join(format!("{prefix}.crt"));
    let key_path = dir.path().join(format!("{prefix}.key"));
    std::fs::write(&cert_path, cert.serialize_pem().unwrap()).unwrap();
    std::fs::write(&key_path, cert.serialize_private_key_pem()).unwrap();
    TestIdentity {
        cert_path,
        key_path,
    }
}

/// Deterministic packet of `len` bytes tagged with `seed`.
pub fn packet(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}
