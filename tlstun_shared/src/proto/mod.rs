//! Wire protocol spoken inside the TLS stream.

pub mod framing;

pub use framing::{FramedChannel, LENGTH_PREFIX_SIZE, MTU, PacketBuffer, encode_frame};
