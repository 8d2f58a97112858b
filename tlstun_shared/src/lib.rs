//! Point-to-point TLS tunnel for IP packets.
//!
//! A TUN interface on each side, one TLS stream in between, and a duplex
//! engine that moves length-prefixed packets across it. The server accepts a
//! single peer per run; the client connects with bounded retry.

pub mod config;
pub mod device;
pub mod engine;
pub mod logging;
pub mod proto;
pub mod supervisor;
pub mod transport;
pub mod tunnel;

// Re-export commonly used modules for convenience
pub use config::{Config, ConfigManager, Role};
pub use proto::framing;
pub use tunnel::{TunnelError, TunnelResult};
