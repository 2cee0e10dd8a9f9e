use std::time::{Duration, Instant};

use serbridge_channel::SerialLink;
use tracing::{debug, trace};

use crate::crc::{append_crc, crc_matches};
use crate::error::{ModbusError, Result};

/// Smallest CRC-carrying RTU frame: address, function, two payload bytes
/// or an address pair, and the two CRC bytes.
pub const MIN_RTU_FRAME: usize = 6;

/// Smallest request the engine frames: address, function, two data bytes.
pub const MIN_REQUEST_LEN: usize = 4;

/// Reply sent to the console when no CRC-valid response arrived in time.
pub const TIMEOUT_SENTINEL: &[u8] = b"me";

const POLL_QUANTUM: Duration = Duration::from_millis(1);

/// Outcome of one RTU transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// CRC-validated response with the check bytes stripped.
    Response(Vec<u8>),
    /// The deadline passed before a CRC-valid response accumulated.
    TimedOut,
}

/// Run one Modbus RTU transaction.
///
/// Appends CRC16 to `request`, writes the RTU frame to the port, then polls
/// for response bytes until they validate as CRC16 or `timeout` passes.
/// A timeout is a soft outcome ([`Reply::TimedOut`]); accumulating past
/// `capacity` without a valid frame is fatal.
pub fn transact<P: SerialLink>(
    port: &mut P,
    request: &[u8],
    timeout: Duration,
    capacity: usize,
) -> Result<Reply> {
    if request.len() < MIN_REQUEST_LEN {
        return Err(ModbusError::RequestTooShort {
            len: request.len(),
        });
    }
    if request.len() + 2 > capacity {
        return Err(ModbusError::CrcOverflow {
            needed: request.len() + 2,
            capacity,
        });
    }

    let mut rtu = request.to_vec();
    append_crc(&mut rtu);
    let written = port.write(&rtu)?;
    if written != rtu.len() {
        return Err(ModbusError::ShortWrite {
            expected: rtu.len(),
            written,
        });
    }
    trace!(len = rtu.len(), "RTU request out");

    let mut response = vec![0u8; capacity];
    let mut collected = 0;
    let deadline = Instant::now() + timeout;
    loop {
        if Instant::now() > deadline {
            debug!(collected, "RTU response timeout");
            return Ok(Reply::TimedOut);
        }
        if port.available()? > 0 {
            collected += port.read(&mut response[collected..])?;
            if collected >= MIN_RTU_FRAME && crc_matches(&response[..collected]) {
                trace!(len = collected - 2, "RTU response in");
                return Ok(Reply::Response(response[..collected - 2].to_vec()));
            }
            if collected >= capacity {
                return Err(ModbusError::ResponseOverflow {
                    capacity,
                    collected: hex::encode_upper(&response[..collected]),
                });
            }
        }
        std::thread::sleep(POLL_QUANTUM);
    }
}
