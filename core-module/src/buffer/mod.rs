//! Byte-level packet buffer abstraction shared by the wire codec.

pub mod buffer;

pub use buffer::{BufferError, PacketBuffer, VectorPacketBuffer};
