/// Errors that can occur during frame reading/writing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The channel closed before a complete header or payload arrived.
    #[error("short frame read ({got} of {expected} bytes)")]
    ShortRead { expected: usize, got: usize },

    /// The declared payload length exceeds the negotiated capacity.
    #[error("oversize frame ({size} bytes, max {max})")]
    OversizeFrame { size: usize, max: usize },

    /// The sink accepted fewer bytes than the complete frame.
    #[error("short frame write ({written} of {expected} bytes)")]
    ShortWrite { expected: usize, written: usize },

    /// A channel error occurred while reading or writing frames.
    #[error("frame channel error: {0}")]
    Channel(#[from] serbridge_channel::ChannelError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
