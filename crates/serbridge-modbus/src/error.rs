/// Errors that can occur in the RTU transaction engine.
#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    /// An RTU request needs at least address, function, and two data bytes.
    #[error("RTU request too short ({len} bytes, minimum 4)")]
    RequestTooShort { len: usize },

    /// Appending the CRC would exceed the session buffer capacity.
    #[error("CRC append overflows buffer (needed {needed}, capacity {capacity})")]
    CrcOverflow { needed: usize, capacity: usize },

    /// Response bytes filled the buffer before a CRC-valid frame formed.
    #[error("response overflow waiting for RTU reply (capacity {capacity}, collected {collected})")]
    ResponseOverflow { capacity: usize, collected: String },

    /// The port accepted fewer bytes than the complete RTU frame.
    #[error("short serial write ({written} of {expected} bytes)")]
    ShortWrite { expected: usize, written: usize },

    /// A channel error occurred on the serial port.
    #[error("serial channel error: {0}")]
    Channel(#[from] serbridge_channel::ChannelError),
}

pub type Result<T> = std::result::Result<T, ModbusError>;
