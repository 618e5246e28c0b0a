//! The reliable-UDP wire protocol: CRC-32, the fixed-header packet codec,
//! and the handshake metadata format.

mod codec;
mod crc32;
mod handshake;
mod packet;

pub use codec::{Decode, Encode};
pub use crc32::crc32;
pub use handshake::{HandshakeError, HandshakeMetadata};
pub use packet::{CodecError, Packet, PacketType, HEADER_LEN, MAGIC, VERSION};
