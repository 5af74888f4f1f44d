//! Errors surfaced by the framing helpers, the requester and the responder.

use fetch_core::{FrameDecodeError, FrameEncodeError};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Opening the stream failed: peer unreachable, handshake rejected, protocol unsupported.
    #[error("connect: {0}")]
    Connect(#[source] std::io::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("message too large: {size} bytes (max {max})")]
    Oversize { size: usize, max: usize },
    #[error("malformed message: {0}")]
    Decode(#[source] bincode::Error),
    #[error("encode: {0}")]
    Encode(#[source] bincode::Error),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("cancelled")]
    Cancelled,
    #[error("fetch: received unknown status code {0}")]
    UnknownStatus(u32),
}

impl From<FrameDecodeError> for FetchError {
    fn from(err: FrameDecodeError) -> Self {
        match err {
            FrameDecodeError::TooLarge { size, max } => FetchError::Oversize { size, max },
            FrameDecodeError::Decode(e) => FetchError::Decode(e),
        }
    }
}

impl From<FrameEncodeError> for FetchError {
    fn from(err: FrameEncodeError) -> Self {
        match err {
            FrameEncodeError::TooLarge { size, max } => FetchError::Oversize { size, max },
            FrameEncodeError::Encode(e) => FetchError::Encode(e),
        }
    }
}
