//! RESP (Redis Serialization Protocol) frames and wire codec.

mod codec;
mod frame;

pub use codec::{Decoder, Encoder};
pub use frame::Frame;
