//! Secure tunnel to the single peer of a run.
//!
//! This module owns the TLS side of the system: credential settings, context
//! construction, the connection state machine and the error taxonomy shared
//! by every other layer.

mod config;
mod error;
mod secure;
pub mod tls;
pub mod types;

pub use config::TlsSettings;
pub use error::{TunnelError, TunnelResult};
pub use secure::SecureTunnel;
pub use types::{PeerIdentity, SessionId, TunnelRole, TunnelState, TunnelStats};
