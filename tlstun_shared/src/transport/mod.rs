//! Byte-stream seam beneath the packet framing layer.
//!
//! [`crate::tunnel::SecureTunnel`] is the production implementation. Tests
//! plug in in-memory streams that deliver data in arbitrary chunk sizes.

use async_trait::async_trait;
use std::net::SocketAddr;

use crate::tunnel::TunnelResult;

/// Represents an active, ordered byte stream to the peer.
#[async_trait]
pub trait Connection: Send {
    /// Writes some prefix of `data` and returns how many bytes were taken.
    ///
    /// Short writes are allowed; callers loop until everything is written.
    async fn send_data(&mut self, data: &[u8]) -> TunnelResult<usize>;

    /// Pushes buffered bytes towards the peer.
    async fn flush(&mut self) -> TunnelResult<()>;

    /// Reads whatever is available into `buf`.
    ///
    /// Returns `Ok(0)` once the peer has closed the stream. Must be cancel
    /// safe: dropping the future before it completes loses no data.
    async fn recv_data(&mut self, buf: &mut [u8]) -> TunnelResult<usize>;

    /// Returns the peer's socket address, when known.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Orderly shutdown. Calling it more than once is a no-op.
    async fn close(&mut self) -> TunnelResult<()>;
}
