use serbridge_channel::ChannelError;
use serbridge_frame::FrameError;
use serbridge_modbus::ModbusError;

/// Errors raised by the command interpreter and the loop modes.
///
/// All of these are fatal: a malformed command buffer or a broken channel
/// invariant is a wiring error upstream, not a recoverable condition.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The opcode at `index` is not in the command table.
    #[error("unknown command {opcode:?} at index {index}")]
    UnknownCommand { opcode: char, index: usize },

    /// The command buffer ended while an argument was still expected.
    #[error("command buffer exhausted at index {index}")]
    BufferExhausted { index: usize },

    /// A single decimal digit was expected at `index`.
    #[error("expected digit at index {index}")]
    ExpectedDigit { index: usize },

    /// A run of one or more decimal digits was expected at `index`.
    #[error("expected number at index {index}")]
    ExpectedNumber { index: usize },

    /// A delimited string argument ran to the end of the buffer.
    #[error("delimiter {delimiter:?} not found from index {index}")]
    DelimiterNotFound { delimiter: char, index: usize },

    /// `l` was given a mode outside r/t/g/m/s.
    #[error("invalid loop mode {mode:?} at index {index}")]
    InvalidLoopMode { mode: char, index: usize },

    /// `f` was given a mode outside d/t.
    #[error("invalid flush mode {mode:?} at index {index}")]
    InvalidFlushMode { mode: char, index: usize },

    /// `b` demands a positive capacity.
    #[error("buffer capacity must be positive")]
    ZeroCapacity,

    /// The port accepted fewer bytes than the complete payload.
    #[error("short serial write ({written} of {expected} bytes)")]
    ShortSerialWrite { expected: usize, written: usize },

    /// A timed read filled the whole buffer before its terminator.
    #[error("read overflow (capacity {capacity}, collected {collected})")]
    ReadOverflow { capacity: usize, collected: String },

    /// The text loop line buffer filled before a newline.
    #[error("line buffer overflow (capacity {capacity}, line {line}, pending {pending})")]
    LineOverflow {
        capacity: usize,
        line: String,
        pending: String,
    },

    /// Response accumulation in a loop mode filled the buffer.
    #[error(
        "response buffer overflow (capacity {capacity}, collected {collected}, pending {pending})"
    )]
    ResponseOverflow {
        capacity: usize,
        collected: String,
        pending: String,
    },

    /// Serial bytes arrived while no request was outstanding.
    #[error("unsolicited serial data: {data}")]
    UnsolicitedSerialData { data: String },

    /// Serial bytes remained in the batch after a completed response.
    #[error("residual serial data after response: {data}")]
    ResidualSerialData { data: String },

    /// A gateway request frame is shorter than its encapsulation header.
    #[error("encapsulated request too short ({len} bytes)")]
    EncapTooShort { len: usize },

    /// A gateway request frame disagreed with its encapsulation header.
    #[error("encapsulation length mismatch (declared {declared}, frame {actual})")]
    EncapLengthMismatch { declared: usize, actual: usize },

    /// Frame-transport error on the console channel.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Channel error on the console or serial side.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// RTU transaction error.
    #[error("modbus error: {0}")]
    Modbus(#[from] ModbusError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
