//! Terminal error taxonomy. Protocol-level problems that never raise
//! (decode failures, CRC mismatch, malformed handshake, missing session,
//! full session table) are not represented here; they are handled in
//! place as logged drops or advisory `ERROR` packets. Only retry
//! exhaustion and local I/O failure reach these types.

use std::io;

use thiserror::Error;

/// Terminal sender failure, mapped to a process exit code.
#[derive(Debug, Error)]
pub enum SenderError {
    #[error("handshake not acknowledged after max retries")]
    HandshakeFailed,
    #[error("data phase exceeded max retries")]
    MaxRetriesExceeded,
    #[error("FIN was not acknowledged after max retries")]
    FinNotAcked,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SenderError {
    /// The process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::HandshakeFailed => 2,
            Self::MaxRetriesExceeded => 3,
            Self::FinNotAcked => 4,
            Self::Io(_) => 1,
        }
    }
}

/// Terminal receiver failure. The receiver otherwise runs until signalled;
/// only a local I/O/socket failure is terminal.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
