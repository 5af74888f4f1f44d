//! PeaFetch wire protocol: message types, status codes and limits.

use serde::{Deserialize, Serialize};

/// Protocol identifier negotiated when a stream is opened.
pub const FETCH_PROTOCOL_ID: &str = "/libp2p/fetch/0.0.1";

/// Largest payload (after the length prefix) either side will read or write.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20; // 1 MiB

/// Sent by the requester: the key it wants resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub identifier: String,
}

/// Sent by the responder. `data` is only meaningful when `status` is [`Status::Ok`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub data: Vec<u8>,
}

impl Response {
    pub fn found(data: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            data,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            data: Vec::new(),
        }
    }
}

/// Response status. Travels as a `u32`; codes this version does not know decode to
/// [`Status::Unknown`] instead of failing or being coerced to a known value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum Status {
    Ok,
    NotFound,
    Unknown(u32),
}

impl Status {
    pub const OK_CODE: u32 = 0;
    pub const NOT_FOUND_CODE: u32 = 1;

    pub fn code(self) -> u32 {
        match self {
            Status::Ok => Self::OK_CODE,
            Status::NotFound => Self::NOT_FOUND_CODE,
            Status::Unknown(code) => code,
        }
    }
}

impl From<u32> for Status {
    fn from(code: u32) -> Self {
        match code {
            Self::OK_CODE => Status::Ok,
            Self::NOT_FOUND_CODE => Status::NotFound,
            other => Status::Unknown(other),
        }
    }
}

impl From<Status> for u32 {
    fn from(status: Status) -> Self {
        status.code()
    }
}
