//! The serial bridge engine.
//!
//! A [`Session`] interprets compact one-letter command buffers arriving as
//! console frames (or a launch argument), drives the serial device through
//! timed, deadline-bounded reads, and can hand control permanently to one
//! of the continuous forwarding loops: raw passthrough, text line
//! reassembly, or the Modbus RTU gateway/master/slave translators.
//!
//! Every error this crate returns is fatal in the protocol's sense: the
//! command stream or a channel invariant is broken and the outer driver is
//! expected to log and terminate. Timeouts and empty reads are ordinary
//! results, never errors.

pub mod command;
pub mod error;
pub mod loops;
pub mod session;
pub mod timed;

pub use command::CommandBuffer;
pub use error::{EngineError, Result};
pub use loops::{LoopMode, Readiness};
pub use session::{Session, SessionConfig};
