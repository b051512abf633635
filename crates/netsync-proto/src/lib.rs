//! NetSync wire protocol.
//!
//! Defines the client/server message types, their binary encoding, and the
//! length-prefixed framing used on the TCP stream.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod frame;
pub mod message;
pub mod snapshot;
pub mod transform;

pub use codec::CodecError;
pub use frame::{FrameError, MAX_FRAME_LEN, read_frame, write_frame};
pub use message::{ClientMessage, RpcTarget, ServerMessage};
pub use snapshot::RoomSnapshot;
pub use transform::Transform;

/// Participant identifier assigned by the server, unique within a room.
pub type ClientNo = u32;

/// Version sent in `Hello`; the server rejects any other value.
pub const PROTOCOL_VERSION: u16 = 1;
