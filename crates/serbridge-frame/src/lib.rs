//! Length-prefixed packet framing for the console channel.
//!
//! Every message between the bridge and its controlling process is framed
//! with a 2-byte big-endian payload length. The declared length is checked
//! against the session's negotiated buffer capacity before the payload is
//! read, and a frame once begun must complete: partial reads and partial
//! writes are protocol failures, never retried across dispatches.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_len, encode_frame, HEADER_SIZE, MAX_FRAME_LEN};
pub use error::{FrameError, Result};
pub use reader::read_frame;
pub use writer::write_frame;
