//! Protocol Module
//!
//! Defines the wire protocol shared by client and server.
//!
//! ## Frame Format (big-endian)
//!
//! ```text
//! ┌──────────────┬───────────┬──────────────┬────────────┬─────────────────┐
//! │ Sequence (8) │ Magic (4) │  Flags (8)   │ Length (4) │ Payload (Length)│
//! └──────────────┴───────────┴──────────────┴────────────┴─────────────────┘
//! ```
//!
//! ### Flags
//! - bit 0: ERROR (payload is a UTF-8 error message)
//! - all other bits reserved, must be zero
//!
//! Requests travel client to server and responses travel back; both are
//! plain data frames. The sequence of a response echoes its request.

mod codec;
mod frame;

pub use codec::{read_frame, write_frame, FrameCodec};
pub use frame::{flags, Frame, FrameType, Header, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE, MAGIC};
