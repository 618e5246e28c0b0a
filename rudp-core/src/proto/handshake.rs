//! Handshake metadata: the payload of a `HANDSHAKE` packet, a UTF-8 string
//! with five pipe-delimited fields:
//! `filename | file_size_bytes | total_packets | chunk_size | window_size`.
//!
//! Only `filename` and `total_packets` are semantically consumed by the
//! receiver; the rest are informational and kept only for logging.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("handshake payload is not valid UTF-8")]
    NotUtf8,
    #[error("handshake payload has fewer than five pipe-delimited fields")]
    TooFewFields,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMetadata {
    pub filename: String,
    pub file_size: u64,
    pub total_packets: u32,
    pub chunk_size: u32,
    pub window: u16,
}

impl HandshakeMetadata {
    pub fn new(filename: &str, file_size: u64, total_packets: u32, chunk_size: u32, window: u16) -> Self {
        Self {
            filename: filename.to_string(),
            file_size,
            total_packets,
            chunk_size,
            window,
        }
    }

    /// Formats the pipe-delimited wire representation.
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.filename, self.file_size, self.total_packets, self.chunk_size, self.window
        )
    }

    /// Parses the pipe-delimited wire representation. Requires at least
    /// five fields; extra fields beyond the fifth are ignored. Only the
    /// field count is validated: `filename` is taken verbatim and
    /// `total_packets` is read leniently, falling back to `0` on a
    /// non-numeric value rather than rejecting the handshake. The
    /// remaining informational fields (`file_size`, `chunk_size`,
    /// `window`) are parsed the same lenient way since nothing downstream
    /// depends on them being accurate.
    pub fn parse(payload: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(payload).map_err(|_| HandshakeError::NotUtf8)?;
        let fields: Vec<&str> = text.split('|').collect();
        if fields.len() < 5 {
            return Err(HandshakeError::TooFewFields);
        }

        let filename = fields[0].to_string();
        let file_size = fields[1].parse().unwrap_or(0);
        let total_packets = fields[2].parse().unwrap_or(0);
        let chunk_size = fields[3].parse().unwrap_or(0);
        let window = fields[4].parse().unwrap_or(0);

        Ok(Self {
            filename,
            file_size,
            total_packets,
            chunk_size,
            window,
        })
    }
}
