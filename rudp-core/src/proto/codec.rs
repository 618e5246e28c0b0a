//! Minimal big-endian encode/decode traits, in the style of the wire-level
//! primitives a binary protocol crate builds its packet codec on top of.

use std::io::{self, Read, Write};
use std::mem;

pub trait Encode {
    fn encode<W: Write>(&self, writer: W) -> io::Result<()>;
}

pub trait Decode: Sized {
    fn decode<R: Read>(reader: R) -> io::Result<Self>;
}

macro_rules! impl_uint_be {
    ($($t:ty),* $(,)?) => {
        $(
            impl Encode for $t {
                fn encode<W: Write>(&self, mut writer: W) -> io::Result<()> {
                    writer.write_all(&self.to_be_bytes())
                }
            }

            impl Decode for $t {
                fn decode<R: Read>(mut reader: R) -> io::Result<Self> {
                    let mut buf = [0u8; mem::size_of::<Self>()];
                    reader.read_exact(&mut buf)?;
                    Ok(Self::from_be_bytes(buf))
                }
            }
        )*
    };
}

impl_uint_be!(u8, u16, u32);
