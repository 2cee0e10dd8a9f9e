use std::fmt;
use std::io;

use serbridge_channel::ChannelError;
use serbridge_engine::EngineError;
use serbridge_frame::FrameError;
use serbridge_modbus::ModbusError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const CHANNEL_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const PROTOCOL_ERROR: i32 = 60;
pub const INTERNAL: i32 = 125;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Map a fatal engine error onto a process exit code.
///
/// Channel breakage (device unplugged, console gone) is distinguished from
/// protocol violations (bad grammar, CRC state, overflow) so supervisors
/// can tell a wiring problem from a controller bug.
pub fn engine_error(context: &str, err: EngineError) -> CliError {
    let code = match &err {
        EngineError::Channel(err) => channel_code(err),
        EngineError::Frame(FrameError::Channel(err)) => channel_code(err),
        EngineError::Modbus(ModbusError::Channel(err)) => channel_code(err),
        EngineError::Frame(_) | EngineError::Modbus(_) => PROTOCOL_ERROR,
        EngineError::UnknownCommand { .. }
        | EngineError::BufferExhausted { .. }
        | EngineError::ExpectedDigit { .. }
        | EngineError::ExpectedNumber { .. }
        | EngineError::DelimiterNotFound { .. }
        | EngineError::InvalidLoopMode { .. }
        | EngineError::InvalidFlushMode { .. }
        | EngineError::ZeroCapacity => PROTOCOL_ERROR,
        EngineError::ShortSerialWrite { .. }
        | EngineError::ReadOverflow { .. }
        | EngineError::LineOverflow { .. }
        | EngineError::ResponseOverflow { .. }
        | EngineError::UnsolicitedSerialData { .. }
        | EngineError::ResidualSerialData { .. }
        | EngineError::EncapTooShort { .. }
        | EngineError::EncapLengthMismatch { .. } => PROTOCOL_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

fn channel_code(err: &ChannelError) -> i32 {
    match err {
        ChannelError::Io(source) => io_code(source),
        ChannelError::Open { .. }
        | ChannelError::Serial(_)
        | ChannelError::AlreadyOpen
        | ChannelError::NotOpen => CHANNEL_ERROR,
        ChannelError::InvalidBaud(_) | ChannelError::InvalidLineConfig(_) => PROTOCOL_ERROR,
    }
}

fn io_code(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FAILURE,
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => FAILURE,
        _ => INTERNAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grammar_errors_map_to_protocol_code() {
        let err = engine_error(
            "dispatch failed",
            EngineError::UnknownCommand {
                opcode: 'q',
                index: 3,
            },
        );
        assert_eq!(err.code, PROTOCOL_ERROR);
        assert!(err.message.contains("index 3"));
    }

    #[test]
    fn io_permission_maps_to_permission_code() {
        let io = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = engine_error("open failed", EngineError::Channel(ChannelError::Io(io)));
        assert_eq!(err.code, PERMISSION_DENIED);
    }

    #[test]
    fn closed_port_maps_to_channel_code() {
        let err = engine_error("command failed", EngineError::Channel(ChannelError::NotOpen));
        assert_eq!(err.code, CHANNEL_ERROR);
    }

    #[test]
    fn nested_frame_channel_error_unwraps() {
        let io = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        let err = engine_error(
            "console failed",
            EngineError::Frame(FrameError::Channel(ChannelError::Io(io))),
        );
        assert_eq!(err.code, FAILURE);
    }
}
