//! Error types for the tunnel module.

use std::io;
use thiserror::Error;

use crate::tunnel::types::TunnelState;

/// Result type for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Error types that can occur while setting up or running a tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The virtual interface could not be acquired or configured
    #[error("Virtual interface unavailable: {0}")]
    DeviceUnavailable(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// None of the resolved peer addresses accepted a connection
    #[error("Unreachable host: {0}")]
    UnreachableHost(String),

    /// TLS context setup or handshake failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Operation requires an established session
    #[error("Tunnel not connected (state: {0})")]
    NotConnected(TunnelState),

    /// Peer announced a frame longer than the transfer buffer
    #[error("Frame too large: {size} bytes (max: {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    /// Peer closed the stream
    #[error("Peer closed the connection")]
    PeerClosed,

    /// A frame could not be written completely
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TunnelError {
    /// Whether this error happened before a session was established.
    ///
    /// Setup failures abort a connection attempt; everything else ends a
    /// running forwarding session.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            TunnelError::DeviceUnavailable(_)
                | TunnelError::UnreachableHost(_)
                | TunnelError::HandshakeFailed(_)
                | TunnelError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_failure_classification() {
        assert!(TunnelError::DeviceUnavailable("tun0".into()).is_setup_failure());
        assert!(TunnelError::UnreachableHost("nowhere:1".into()).is_setup_failure());
        assert!(TunnelError::HandshakeFailed("bad cert".into()).is_setup_failure());

        assert!(!TunnelError::PeerClosed.is_setup_failure());
        assert!(!TunnelError::FrameTooLarge { size: 2001, max: 2000 }.is_setup_failure());
        assert!(!TunnelError::WriteFailed("broken pipe".into()).is_setup_failure());
        assert!(!TunnelError::NotConnected(TunnelState::Idle).is_setup_failure());
    }

    #[test]
    fn test_display_names_state() {
        let err = TunnelError::NotConnected(TunnelState::Closed);
        assert_eq!(err.to_string(), "Tunnel not connected (state: closed)");
    }
}
