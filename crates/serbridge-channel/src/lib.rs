//! Byte-channel collaborators for the serial bridge.
//!
//! Two channels exist at runtime: the console (the controlling process,
//! framed per `serbridge-frame`) and the serial device. This is the lowest
//! layer of serbridge. Everything else builds on the [`ByteSource`] and
//! [`ByteSink`] traits defined here.

pub mod error;
pub mod serial;
pub mod traits;

#[cfg(unix)]
pub mod console;

pub use error::{ChannelError, Result};
pub use serial::{SerialDevice, SerialSettings, SystemSerial, SUPPORTED_BAUD_RATES};
pub use traits::{ByteSink, ByteSource, SerialLink, SerialOpener};

#[cfg(unix)]
pub use console::{ConsoleIn, ConsoleOut};
