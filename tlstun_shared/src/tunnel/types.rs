//! Type definitions for the tunnel module.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Unique identifier for one forwarding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a fresh random session id.
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of the tunnel (client or server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelRole {
    /// Client role
    Client,
    /// Server role
    Server,
}

impl fmt::Display for TunnelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelRole::Client => f.write_str("client"),
            TunnelRole::Server => f.write_str("server"),
        }
    }
}

impl From<crate::config::Role> for TunnelRole {
    fn from(role: crate::config::Role) -> Self {
        match role {
            crate::config::Role::Client => TunnelRole::Client,
            crate::config::Role::Server => TunnelRole::Server,
        }
    }
}

/// Handshake state of a secure tunnel.
///
/// `Idle -> Connecting | Listening -> Handshaking -> Established -> Closed`.
/// Any failure before `Established` moves straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Nothing acquired yet
    Idle,
    /// Client is opening the stream connection
    Connecting,
    /// Server holds a bound listening socket
    Listening,
    /// Stream is open, TLS handshake in progress
    Handshaking,
    /// Session is ready for data
    Established,
    /// Torn down; terminal
    Closed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TunnelState::Idle => "idle",
            TunnelState::Connecting => "connecting",
            TunnelState::Listening => "listening",
            TunnelState::Handshaking => "handshaking",
            TunnelState::Established => "established",
            TunnelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What we learned about the peer during the handshake.
///
/// Purely informational; nothing here is used for access decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Socket address of the peer
    pub addr: Option<SocketAddr>,
    /// Number of certificates the peer presented
    pub certificate_count: usize,
    /// Hex SHA-256 of the leaf certificate, if one was presented
    pub fingerprint: Option<String>,
    /// Negotiated protocol version, e.g. "TLSv1_3"
    pub protocol: Option<String>,
    /// Negotiated cipher suite
    pub cipher_suite: Option<String>,
}

impl PeerIdentity {
    /// Build an identity from the DER certificates a peer presented.
    pub fn from_certificates(addr: Option<SocketAddr>, certs: &[Vec<u8>]) -> Self {
        PeerIdentity {
            addr,
            certificate_count: certs.len(),
            fingerprint: certs.first().map(|leaf| fingerprint(leaf)),
            protocol: None,
            cipher_suite: None,
        }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.addr {
            Some(addr) => write!(f, "{}", addr)?,
            None => f.write_str("unknown peer")?,
        }
        write!(f, " ({} certificate(s)", self.certificate_count)?;
        if let Some(fp) = &self.fingerprint {
            write!(f, ", sha256 {}", fp)?;
        }
        f.write_str(")")
    }
}

/// Lowercase hex SHA-256 digest of a DER blob.
pub fn fingerprint(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Counters for one forwarding session.
#[derive(Debug, Clone)]
pub struct TunnelStats {
    /// When the session started
    pub created_at: Instant,
    /// When a packet last moved in either direction
    pub last_active: Instant,
    /// Total payload bytes sent to the peer
    pub bytes_sent: u64,
    /// Total payload bytes received from the peer
    pub bytes_received: u64,
    /// Packets read from the interface and sent to the peer
    pub packets_sent: u64,
    /// Packets received from the peer and written to the interface
    pub packets_received: u64,
    /// Session uptime
    pub uptime: Duration,
}

impl TunnelStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        let now = Instant::now();
        TunnelStats {
            created_at: now,
            last_active: now,
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
            uptime: Duration::from_secs(0),
        }
    }

    /// Update the last active time.
    pub fn update_last_active(&mut self) {
        self.last_active = Instant::now();
    }

    /// Update the uptime.
    pub fn update_uptime(&mut self) {
        self.uptime = self.created_at.elapsed();
    }

    /// Record one packet read from the interface.
    pub fn record_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.packets_sent += 1;
        self.update_last_active();
    }

    /// Record one packet received from the peer.
    pub fn record_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.packets_received += 1;
        self.update_last_active();
    }
}

impl Default for TunnelStats {
    fn default() -> Self {
        Self::new()
    }
}
