use std::cmp;
use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use tracing::{debug, trace};

use crate::error::{ChannelError, Result};
use crate::traits::{ByteSink, ByteSource, SerialLink, SerialOpener};

/// Baud rates the bridge accepts.
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Device read timeout applied before any packet timeout is configured.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Validated line settings for a serial device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SerialSettings {
    pub baud: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl SerialSettings {
    /// Parse a decimal baud rate and a three-character line configuration
    /// (`8N1`, `7E1`, `7O1`).
    pub fn parse(baud: &str, config: &str) -> Result<Self> {
        let baud: u32 = baud
            .parse()
            .map_err(|_| ChannelError::InvalidBaud(baud.to_string()))?;
        if !SUPPORTED_BAUD_RATES.contains(&baud) {
            return Err(ChannelError::InvalidBaud(baud.to_string()));
        }
        let (data_bits, parity) = match config {
            "8N1" => (DataBits::Eight, Parity::None),
            "7E1" => (DataBits::Seven, Parity::Even),
            "7O1" => (DataBits::Seven, Parity::Odd),
            other => return Err(ChannelError::InvalidLineConfig(other.to_string())),
        };
        Ok(Self {
            baud,
            data_bits,
            parity,
            stop_bits: StopBits::One,
        })
    }
}

/// A serial device opened through the `serialport` crate.
pub struct SerialDevice {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialDevice {
    /// The device path this port was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Debug for SerialDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDevice")
            .field("path", &self.path)
            .finish()
    }
}

impl ByteSource for SerialDevice {
    fn available(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pending = self.available()?;
        let want = cmp::min(pending, buf.len());
        if want == 0 {
            return Ok(0);
        }
        let read = self.port.read(&mut buf[..want])?;
        trace!(port = %self.path, data = %hex::encode_upper(&buf[..read]), "ser<");
        Ok(read)
    }
}

impl ByteSink for SerialDevice {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        trace!(port = %self.path, data = %hex::encode_upper(buf), "ser>");
        Ok(self.port.write(buf)?)
    }
}

impl SerialLink for SerialDevice {
    fn discard(&mut self) -> Result<()> {
        debug!(port = %self.path, "discarding serial buffers");
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        debug!(port = %self.path, "draining serial output");
        self.port.flush()?;
        Ok(())
    }

    fn set_packet_timeout(&mut self, timeout: Duration) -> Result<()> {
        debug!(port = %self.path, ?timeout, "packet timeout");
        self.port.set_timeout(timeout)?;
        Ok(())
    }
}

/// Opens real devices via `serialport`.
#[derive(Debug, Default)]
pub struct SystemSerial;

impl SerialOpener for SystemSerial {
    type Port = SerialDevice;

    fn open(&mut self, path: &str, settings: &SerialSettings) -> Result<SerialDevice> {
        let port = serialport::new(path, settings.baud)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .timeout(DEFAULT_READ_TIMEOUT)
            .open()
            .map_err(|source| ChannelError::Open {
                port: path.to_string(),
                source,
            })?;
        debug!(%path, baud = settings.baud, "serial port open");
        Ok(SerialDevice {
            port,
            path: path.to_string(),
        })
    }
}
