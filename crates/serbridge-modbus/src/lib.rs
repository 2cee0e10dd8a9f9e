//! Modbus RTU framing for the serial bridge.
//!
//! The bridge carries no function-code semantics: an RTU frame is opaque
//! payload plus a trailing CRC16 (polynomial 0xA001, seed 0xFFFF, low byte
//! on the wire first). This crate computes and validates that CRC, runs the
//! one-shot request/response transaction, and reads/rewrites the 6-byte
//! encapsulation header the gateway loop translates to and from.

pub mod crc;
pub mod encap;
pub mod error;
pub mod transaction;

pub use crc::{append_crc, crc16, crc_matches};
pub use encap::{declared_len, set_declared_len, ENCAP_HEADER_LEN};
pub use error::{ModbusError, Result};
pub use transaction::{transact, Reply, MIN_REQUEST_LEN, MIN_RTU_FRAME, TIMEOUT_SENTINEL};
