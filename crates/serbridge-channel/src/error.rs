/// Errors that can occur on the console or serial byte channels.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to open the serial device.
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        source: serialport::Error,
    },

    /// A serial port is already open for this session.
    #[error("serial port already open")]
    AlreadyOpen,

    /// A serial operation was attempted with no open port.
    #[error("serial port not open")]
    NotOpen,

    /// The requested baud rate is not supported.
    #[error("unsupported baud rate: {0}")]
    InvalidBaud(String),

    /// The requested line configuration is not supported.
    #[error("unsupported line configuration: {0}")]
    InvalidLineConfig(String),

    /// A serial device operation failed.
    #[error("serial device error: {0}")]
    Serial(#[from] serialport::Error),

    /// An I/O error occurred on a channel.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
