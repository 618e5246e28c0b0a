//! The wire format: a fixed 20-byte header followed by a variable-length
//! payload. Magic `b"RU"`, version 1, seven packet types, big-endian
//! integer fields, CRC-32 over the payload for `DATA`.

use std::io::{self, ErrorKind};

use thiserror::Error;

use super::codec::{Decode, Encode};
use super::crc32::crc32;

pub const MAGIC: [u8; 2] = [b'R', b'U'];
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Handshake,
    HandshakeAck,
    Data,
    Ack,
    Fin,
    FinAck,
    Error,
}

impl PacketType {
    fn tag(self) -> u8 {
        match self {
            Self::Handshake => 0,
            Self::HandshakeAck => 1,
            Self::Data => 2,
            Self::Ack => 3,
            Self::Fin => 4,
            Self::FinAck => 5,
            Self::Error => 6,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Handshake,
            1 => Self::HandshakeAck,
            2 => Self::Data,
            3 => Self::Ack,
            4 => Self::Fin,
            5 => Self::FinAck,
            6 => Self::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("packet shorter than the 20-byte header")]
    Short,
    #[error("bad magic bytes or version")]
    BadMagic,
    #[error("declared payload length exceeds the buffer")]
    LengthMismatch,
    #[error("unknown packet type tag {0}")]
    UnknownType(u8),
}

/// A single protocol packet. Every field below is present on the wire for
/// every packet type (the header layout is type-independent); only a
/// subset of fields carries meaning for any given `PacketType` (on
/// control packets the checksum has no defined meaning).
///
/// A uniform struct (rather than a variant-per-type enum with disjoint
/// fields) is used deliberately: the codec round-trip property requires
/// every header field, including a control packet's otherwise meaningless
/// checksum, to survive `decode(encode(p))` unchanged, which only holds
/// if the representation always carries all five fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub ptype: PacketType,
    pub seq: u32,
    pub total: u32,
    pub window: u16,
    pub checksum: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Builds a `HANDSHAKE` packet whose payload is the pipe-delimited
    /// metadata string.
    pub fn handshake(metadata: impl Into<Vec<u8>>, window: u16) -> Self {
        Self {
            ptype: PacketType::Handshake,
            seq: 0,
            total: 0,
            window,
            checksum: 0,
            payload: metadata.into(),
        }
    }

    pub fn handshake_ack(total: u32, window: u16) -> Self {
        Self {
            ptype: PacketType::HandshakeAck,
            seq: 0,
            total,
            window,
            checksum: 0,
            payload: Vec::new(),
        }
    }

    /// Builds a `DATA` packet. `checksum` is left at `0`; [`Packet::encode`]
    /// fills in the real CRC-32 of `payload` at encode time.
    pub fn data(seq: u32, total: u32, window: u16, payload: Vec<u8>) -> Self {
        Self {
            ptype: PacketType::Data,
            seq,
            total,
            window,
            checksum: 0,
            payload,
        }
    }

    pub fn ack(seq: u32, total: u32, window: u16) -> Self {
        Self {
            ptype: PacketType::Ack,
            seq,
            total,
            window,
            checksum: 0,
            payload: Vec::new(),
        }
    }

    pub fn fin(seq: u32) -> Self {
        Self {
            ptype: PacketType::Fin,
            seq,
            total: 0,
            window: 0,
            checksum: 0,
            payload: Vec::new(),
        }
    }

    pub fn fin_ack() -> Self {
        Self {
            ptype: PacketType::FinAck,
            seq: 0,
            total: 0,
            window: 0,
            checksum: 0,
            payload: Vec::new(),
        }
    }

    pub fn error(message: impl Into<Vec<u8>>) -> Self {
        Self {
            ptype: PacketType::Error,
            seq: 0,
            total: 0,
            window: 0,
            checksum: 0,
            payload: message.into(),
        }
    }

    /// Serializes this packet to its wire form: 20-byte header followed by
    /// the payload. For `DATA` packets whose `checksum` is `0`, the CRC-32
    /// of the payload is substituted; other packets pass their checksum
    /// field through unchanged.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(MAGIC[0]);
        buf.push(MAGIC[1]);
        buf.push(VERSION);
        buf.push(self.ptype.tag());

        let checksum = if self.ptype == PacketType::Data && self.checksum == 0 {
            crc32(&self.payload)
        } else {
            self.checksum
        };

        // encode() on primitives never fails against a Vec<u8> writer.
        self.seq.encode(&mut buf).expect("vec write is infallible");
        self.total.encode(&mut buf).expect("vec write is infallible");
        (self.payload.len() as u16)
            .encode(&mut buf)
            .expect("vec write is infallible");
        self.window.encode(&mut buf).expect("vec write is infallible");
        checksum.encode(&mut buf).expect("vec write is infallible");

        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parses a packet from its wire form. Trailing bytes past the
    /// declared payload length are ignored. Does not verify the CRC on
    /// `DATA` packets; that is a receiver FSM policy decision.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::Short);
        }
        if buf[0] != MAGIC[0] || buf[1] != MAGIC[1] || buf[2] != VERSION {
            return Err(CodecError::BadMagic);
        }
        let ptype = PacketType::from_tag(buf[3]).ok_or(CodecError::UnknownType(buf[3]))?;

        let mut rest = &buf[4..];
        let seq = u32::decode(&mut rest).map_err(map_short)?;
        let total = u32::decode(&mut rest).map_err(map_short)?;
        let length = u16::decode(&mut rest).map_err(map_short)?;
        let window = u16::decode(&mut rest).map_err(map_short)?;
        let checksum = u32::decode(&mut rest).map_err(map_short)?;

        let payload_len = length as usize;
        if HEADER_LEN + payload_len > buf.len() {
            return Err(CodecError::LengthMismatch);
        }
        let payload = buf[HEADER_LEN..HEADER_LEN + payload_len].to_vec();

        Ok(Self {
            ptype,
            seq,
            total,
            window,
            checksum,
            payload,
        })
    }
}

/// `Decode` on an exhausted slice returns `UnexpectedEof`; a packet this
/// short already failed the length check in the caller, so this should be
/// unreachable in practice, but map it to `Short` defensively rather than
/// unwrap.
fn map_short(err: io::Error) -> CodecError {
    debug_assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    CodecError::Short
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(p: Packet) {
        let encoded = p.encode();
        let decoded = Packet::decode(&encoded).expect("decode of freshly encoded packet");

        match p.ptype {
            PacketType::Data => {
                assert_eq!(decoded.checksum, crc32(&p.payload));
            }
            _ => {
                assert_eq!(decoded.checksum, p.checksum);
            }
        }
        assert_eq!(decoded.ptype, p.ptype);
        assert_eq!(decoded.seq, p.seq);
        assert_eq!(decoded.total, p.total);
        assert_eq!(decoded.window, p.window);
        assert_eq!(decoded.payload, p.payload);
    }

    #[test]
    fn roundtrip_handshake() {
        roundtrip(Packet::handshake("file.bin|100|1|1024|8", 8));
    }

    #[test]
    fn roundtrip_handshake_ack() {
        roundtrip(Packet::handshake_ack(42, 8));
    }

    #[test]
    fn roundtrip_data() {
        roundtrip(Packet::data(5, 10, 8, b"hello world".to_vec()));
    }

    #[test]
    fn roundtrip_data_with_explicit_checksum() {
        let mut p = Packet::data(5, 10, 8, b"hello world".to_vec());
        p.checksum = 0xDEAD_BEEF;
        // A nonzero checksum on a DATA packet is passed through untouched
        // by encode(); only a checksum of exactly zero triggers fill-in.
        let encoded = p.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded.checksum, 0xDEAD_BEEF);
    }

    #[test]
    fn roundtrip_ack() {
        roundtrip(Packet::ack(7, 10, 8));
    }

    #[test]
    fn roundtrip_fin_and_finack() {
        roundtrip(Packet::fin(9));
        roundtrip(Packet::fin_ack());
    }

    #[test]
    fn roundtrip_error() {
        roundtrip(Packet::error("no session"));
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let buf = [b'R', b'U', VERSION, 2, 0, 0];
        assert_eq!(Packet::decode(&buf), Err(CodecError::Short));
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut buf = Packet::ack(0, 0, 0).encode();
        buf[0] = b'X';
        assert_eq!(Packet::decode(&buf), Err(CodecError::BadMagic));
    }

    #[test]
    fn decode_rejects_bad_version() {
        let mut buf = Packet::ack(0, 0, 0).encode();
        buf[2] = VERSION + 1;
        assert_eq!(Packet::decode(&buf), Err(CodecError::BadMagic));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let mut buf = Packet::data(0, 1, 8, b"hi".to_vec()).encode();
        // Declare a payload length longer than what actually follows.
        buf[12] = 0;
        buf[13] = 200;
        assert_eq!(Packet::decode(&buf), Err(CodecError::LengthMismatch));
    }

    #[test]
    fn decode_ignores_trailing_garbage() {
        let mut buf = Packet::ack(3, 10, 8).encode();
        buf.extend_from_slice(b"trailing garbage");
        let decoded = Packet::decode(&buf).unwrap();
        assert_eq!(decoded.seq, 3);
    }

    #[test]
    fn crc_gating_detects_bit_flip() {
        let mut buf = Packet::data(0, 1, 8, b"abc".to_vec()).encode();
        // Flip one bit of the payload in flight.
        buf[HEADER_LEN] ^= 0x01;
        let decoded = Packet::decode(&buf).unwrap();
        assert_ne!(decoded.checksum, crc32(&decoded.payload));
    }
}
