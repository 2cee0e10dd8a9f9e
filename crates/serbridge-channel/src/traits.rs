use std::time::Duration;

use crate::error::Result;
use crate::serial::SerialSettings;

/// A byte producer with an availability query.
///
/// `read` fills at most `buf.len()` bytes. Implementations backed by a
/// blocking stream (the console) may block until at least one byte is
/// present; `Ok(0)` means the request was empty or the stream is closed.
pub trait ByteSource {
    /// Number of bytes that can be read without blocking.
    fn available(&mut self) -> Result<usize>;

    /// Whether the channel should be serviced: data pending, or a
    /// closed/error state that the next read will surface.
    fn readable(&mut self) -> Result<bool> {
        Ok(self.available()? > 0)
    }

    /// Read up to `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// A byte consumer.
pub trait ByteSink {
    /// Write `buf`, returning the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
}

/// A configured serial device: a byte channel plus the line-control
/// operations of the bridge protocol.
pub trait SerialLink: ByteSource + ByteSink {
    /// Drop all buffered input and untransmitted output.
    fn discard(&mut self) -> Result<()>;

    /// Block until all queued output has been transmitted.
    fn drain(&mut self) -> Result<()>;

    /// Inter-byte timeout hint for device reads.
    fn set_packet_timeout(&mut self, timeout: Duration) -> Result<()>;
}

/// Opens serial devices.
///
/// This is the seam that keeps the engine testable: sessions are generic
/// over the opener, so tests substitute scripted in-memory ports.
pub trait SerialOpener {
    type Port: SerialLink;

    fn open(&mut self, path: &str, settings: &SerialSettings) -> Result<Self::Port>;
}
