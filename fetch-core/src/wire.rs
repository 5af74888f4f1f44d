//! Framing: length-prefix (4 bytes LE) + bincode payload.

use serde::de::DeserializeOwned;
use serde::Serialize;

pub const LEN_SIZE: usize = 4;

/// Encode a message into a single frame: 4 bytes LE length + bincode payload.
/// Fails with `TooLarge` if the payload exceeds `max_len`.
pub fn encode_frame<T: Serialize + ?Sized>(msg: &T, max_len: usize) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg).map_err(FrameEncodeError::Encode)?;
    if payload.len() > max_len || payload.len() > u32::MAX as usize {
        return Err(FrameEncodeError::TooLarge {
            size: payload.len(),
            max: max_len,
        });
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a message into a frame (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

/// Parse a length prefix. Rejects oversize frames before anything is allocated for the body.
pub fn frame_len(prefix: [u8; LEN_SIZE], max_len: usize) -> Result<usize, FrameDecodeError> {
    let len = u32::from_le_bytes(prefix) as usize;
    if len > max_len {
        return Err(FrameDecodeError::TooLarge {
            size: len,
            max: max_len,
        });
    }
    Ok(len)
}

/// Deserialize a frame body (the bytes after the length prefix).
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameDecodeError> {
    bincode::deserialize(payload).map_err(FrameDecodeError::Decode)
}

/// Error decoding a frame: declared size over the limit, or a bincode failure.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
