//! Packet framing for the secure stream.
//!
//! The tunnel carries raw IP packets over an ordered byte stream. Each packet
//! is preceded by its length so the receiver can find packet boundaries again.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------+-------------------------------+
//! |        Length (u16, big-endian)  |   Payload (Length bytes)     |
//! +----------------+----------------+-------------------------------+
//! ```
//!
//! - Length: payload size in bytes, never more than [`MTU`]
//! - Payload: one IP packet, copied verbatim
//!
//! There is no magic, version or checksum; integrity comes from TLS.
//!
//! The stream may hand out a frame in arbitrarily small pieces (down to one
//! byte per read), so both the prefix and the payload are accumulated until
//! complete. A declared length above [`MTU`] is rejected before any payload
//! byte is read.
//!
//! # Example Usage
//!
//! ```rust
//! use tlstun_shared::proto::framing::{encode_frame, MTU};
//!
//! let frame = encode_frame(b"\x45\x00\x00\x14").unwrap();
//! assert_eq!(&frame[..2], &[0x00, 0x04]);
//! assert!(encode_frame(&vec![0u8; MTU + 1]).is_err());
//! ```

use std::fmt;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use tracing::{debug, trace, warn};

use crate::transport::Connection;
use crate::tunnel::{TunnelError, TunnelResult, TunnelState};

/// Largest packet the interface and the frame format carry.
pub const MTU: usize = 2000;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Fixed-capacity packet storage reused across loop iterations.
pub struct PacketBuffer {
    data: [u8; MTU],
    len: usize,
}

impl PacketBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        PacketBuffer {
            data: [0u8; MTU],
            len: 0,
        }
    }

    /// Maximum number of bytes this buffer can hold.
    pub fn capacity(&self) -> usize {
        MTU
    }

    /// Length of the packet currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The whole backing storage, for reads that fill the buffer in place.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Mark the first `len` bytes as the current packet.
    pub fn set_len(&mut self, len: usize) -> TunnelResult<()> {
        if len > MTU {
            return Err(TunnelError::FrameTooLarge {
                size: len,
                max: MTU,
            });
        }
        self.len = len;
        Ok(())
    }

    /// The current packet.
    pub fn packet(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Replace the contents with `bytes`. Rejects oversize input untouched.
    pub fn copy_from(&mut self, bytes: &[u8]) -> TunnelResult<()> {
        if bytes.len() > MTU {
            return Err(TunnelError::FrameTooLarge {
                size: bytes.len(),
                max: MTU,
            });
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("len", &self.len)
            .field("capacity", &MTU)
            .finish()
    }
}

/// Encode one packet as a complete frame.
pub fn encode_frame(packet: &[u8]) -> TunnelResult<Vec<u8>> {
    check_outgoing_len(packet.len())?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + packet.len());
    frame.write_u16::<BigEndian>(packet.len() as u16)?;
    frame.extend_from_slice(packet);
    Ok(frame)
}

fn check_outgoing_len(len: usize) -> TunnelResult<()> {
    if len > MTU {
        return Err(TunnelError::FrameTooLarge {
            size: len,
            max: MTU,
        });
    }
    Ok(())
}

/// Length-prefixed packet channel over a [`Connection`].
///
/// Receive progress (prefix bytes, expected length, payload bytes so far) is
/// kept here, so a pending [`FramedChannel::receive_packet`] can be dropped
/// and resumed later without losing stream position, provided the same
/// output buffer is passed again.
pub struct FramedChannel<C> {
    conn: C,
    header: [u8; LENGTH_PREFIX_SIZE],
    header_filled: usize,
    expected: Option<usize>,
    payload_filled: usize,
    broken: bool,
}

impl<C: Connection> FramedChannel<C> {
    pub fn new(conn: C) -> Self {
        FramedChannel {
            conn,
            header: [0u8; LENGTH_PREFIX_SIZE],
            header_filled: 0,
            expected: None,
            payload_filled: 0,
            broken: false,
        }
    }

    /// The underlying connection.
    pub fn get_ref(&self) -> &C {
        &self.conn
    }

    /// Unwrap the underlying connection.
    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Whether an earlier failure left the stream at an unknown position.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    fn ensure_usable(&self) -> TunnelResult<()> {
        if self.broken {
            return Err(TunnelError::NotConnected(TunnelState::Closed));
        }
        Ok(())
    }

    fn fail(&mut self, err: TunnelError) -> TunnelError {
        self.broken = true;
        err
    }

    /// Send one packet as a frame: the prefix, then the payload.
    ///
    /// Any hard error leaves the channel broken; the frame cannot be resumed.
    pub async fn send_packet(&mut self, packet: &[u8]) -> TunnelResult<()> {
        self.ensure_usable()?;
        check_outgoing_len(packet.len())?;

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        BigEndian::write_u16(&mut prefix, packet.len() as u16);

        self.write_all(&prefix).await?;
        self.write_all(packet).await?;
        if let Err(e) = self.conn.flush().await {
            return Err(self.fail(TunnelError::WriteFailed(e.to_string())));
        }

        trace!(len = packet.len(), "Sent frame");
        Ok(())
    }

    async fn write_all(&mut self, mut data: &[u8]) -> TunnelResult<()> {
        while !data.is_empty() {
            match self.conn.send_data(data).await {
                Ok(0) => {
                    return Err(self.fail(TunnelError::WriteFailed(
                        "connection accepted zero bytes".to_string(),
                    )));
                }
                Ok(n) => data = &data[n..],
                Err(e) => return Err(self.fail(TunnelError::WriteFailed(e.to_string()))),
            }
        }
        Ok(())
    }

    /// Receive one frame into `out` and return the packet length.
    ///
    /// Fails with [`TunnelError::PeerClosed`] when the stream ends, whether
    /// between frames or in the middle of one, and with
    /// [`TunnelError::FrameTooLarge`] when the peer declares more than
    /// [`MTU`] bytes. Both leave the channel broken.
    pub async fn receive_packet(&mut self, out: &mut PacketBuffer) -> TunnelResult<usize> {
        self.ensure_usable()?;

        let expected = match self.expected {
            Some(len) => len,
            None => {
                while self.header_filled < LENGTH_PREFIX_SIZE {
                    let n = match self.conn.recv_data(&mut self.header[self.header_filled..]).await
                    {
                        Ok(n) => n,
                        Err(e) => return Err(self.fail(e)),
                    };
                    if n == 0 {
                        if self.header_filled == 0 {
                            debug!("Peer closed the stream between frames");
                        } else {
                            warn!("Peer closed the stream inside a length prefix");
                        }
                        return Err(self.fail(TunnelError::PeerClosed));
                    }
                    self.header_filled += n;
                }

                let len = BigEndian::read_u16(&self.header) as usize;
                self.header_filled = 0;
                if len > MTU {
                    warn!(size = len, max = MTU, "Peer announced an oversize frame");
                    return Err(self.fail(TunnelError::FrameTooLarge {
                        size: len,
                        max: MTU,
                    }));
                }
                self.expected = Some(len);
                self.payload_filled = 0;
                len
            }
        };

        while self.payload_filled < expected {
            let slot = &mut out.as_mut_slice()[self.payload_filled..expected];
            let n = match self.conn.recv_data(slot).await {
                Ok(n) => n,
                Err(e) => return Err(self.fail(e)),
            };
            if n == 0 {
                warn!(
                    expected,
                    received = self.payload_filled,
                    "Peer closed the stream inside a frame"
                );
                return Err(self.fail(TunnelError::PeerClosed));
            }
            self.payload_filled += n;
        }

        self.expected = None;
        self.payload_filled = 0;
        out.set_len(expected)?;

        trace!(len = expected, "Received frame");
        Ok(expected)
    }

    /// Close the underlying connection.
    pub async fn close(&mut self) -> TunnelResult<()> {
        self.broken = true;
        self.conn.close().await
    }
}
