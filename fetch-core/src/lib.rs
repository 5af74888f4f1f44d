//! PeaFetch protocol reference implementation.
//! No I/O: message types, frame codec and peer identity shared by every host.

pub mod identity;
pub mod protocol;
pub mod wire;

pub use identity::{Keypair, PeerId, PublicKey};
pub use protocol::{Request, Response, Status, FETCH_PROTOCOL_ID, MAX_MESSAGE_SIZE};
pub use wire::{decode_payload, encode_frame, frame_len, FrameDecodeError, FrameEncodeError};
