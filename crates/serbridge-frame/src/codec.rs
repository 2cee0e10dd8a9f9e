use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: 2-byte big-endian payload length.
pub const HEADER_SIZE: usize = 2;

/// Largest payload the header can declare.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────────┬───────────────────┐
/// │ Length (2B BE) │ Payload (L bytes) │
/// └────────────────┴───────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::OversizeFrame {
            size: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u16(payload.len() as u16);
    dst.put_slice(payload);
    Ok(())
}

/// Decode the payload length from a frame header.
pub fn decode_len(header: [u8; HEADER_SIZE]) -> usize {
    u16::from_be_bytes(header) as usize
}
