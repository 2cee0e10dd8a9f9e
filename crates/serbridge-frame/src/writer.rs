use bytes::BytesMut;
use serbridge_channel::ByteSink;
use tracing::trace;

use crate::codec::{encode_frame, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Write one complete frame: the 2-byte big-endian length, then the payload.
///
/// The sink must accept the whole frame; anything less is
/// [`FrameError::ShortWrite`].
pub fn write_frame<C: ByteSink>(sink: &mut C, payload: &[u8]) -> Result<()> {
    let mut wire = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(payload, &mut wire)?;

    let written = sink.write(&wire)?;
    if written != wire.len() {
        return Err(FrameError::ShortWrite {
            expected: wire.len(),
            written,
        });
    }
    trace!(len = payload.len(), "frame out");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serbridge_channel::Result as ChannelResult;

    struct RecordingSink(Vec<u8>);

    impl ByteSink for RecordingSink {
        fn write(&mut self, buf: &[u8]) -> ChannelResult<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    /// Accepts at most `limit` bytes per write.
    struct ThrottledSink {
        data: Vec<u8>,
        limit: usize,
    }

    impl ByteSink for ThrottledSink {
        fn write(&mut self, buf: &[u8]) -> ChannelResult<usize> {
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }

    #[test]
    fn writes_header_then_payload() {
        let mut sink = RecordingSink(Vec::new());
        write_frame(&mut sink, b"hi").unwrap();
        assert_eq!(sink.0, vec![0x00, 0x02, b'h', b'i']);
    }

    #[test]
    fn writes_empty_frame() {
        let mut sink = RecordingSink(Vec::new());
        write_frame(&mut sink, b"").unwrap();
        assert_eq!(sink.0, vec![0x00, 0x00]);
    }

    #[test]
    fn short_write_is_fatal() {
        let mut sink = ThrottledSink {
            data: Vec::new(),
            limit: 3,
        };
        let err = write_frame(&mut sink, b"payload").unwrap_err();
        assert!(matches!(
            err,
            FrameError::ShortWrite {
                expected: 9,
                written: 3
            }
        ));
    }

    #[test]
    fn oversize_payload_rejected_before_writing() {
        let mut sink = RecordingSink(Vec::new());
        let payload = vec![0u8; crate::codec::MAX_FRAME_LEN + 1];
        let err = write_frame(&mut sink, &payload).unwrap_err();
        assert!(matches!(err, FrameError::OversizeFrame { .. }));
        assert!(sink.0.is_empty());
    }
}
