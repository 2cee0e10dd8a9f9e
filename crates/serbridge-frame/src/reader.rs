use serbridge_channel::ByteSource;
use tracing::trace;

use crate::codec::{decode_len, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Read one complete frame, blocking until it is fully delivered.
///
/// The declared length is validated against `capacity` before the payload
/// is read. A channel that closes mid-frame produces
/// [`FrameError::ShortRead`]; a frame once begun never spans two calls.
pub fn read_frame<C: ByteSource>(source: &mut C, capacity: usize) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    read_exact(source, &mut header)?;

    let len = decode_len(header);
    if len > capacity {
        return Err(FrameError::OversizeFrame {
            size: len,
            max: capacity,
        });
    }

    let mut payload = vec![0u8; len];
    read_exact(source, &mut payload)?;
    trace!(len, "frame in");
    Ok(payload)
}

fn read_exact<C: ByteSource>(source: &mut C, buf: &mut [u8]) -> Result<()> {
    let mut got = 0;
    while got < buf.len() {
        let read = source.read(&mut buf[got..])?;
        if read == 0 {
            return Err(FrameError::ShortRead {
                expected: buf.len(),
                got,
            });
        }
        got += read;
    }
    Ok(())
}
