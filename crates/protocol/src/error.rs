//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown message tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("Unexpected end of data")]
    UnexpectedEof,
}
