use std::time::{Duration, Instant};

use serbridge_channel::SerialLink;

use crate::error::{EngineError, Result};

/// Poll quantum for every deadline-bounded wait in the engine.
pub const POLL_QUANTUM: Duration = Duration::from_millis(1);

/// An absolute point in time computed once when a timed operation starts.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Sleep one poll quantum.
    pub fn nap(&self) {
        std::thread::sleep(POLL_QUANTUM);
    }
}

/// Read whatever is immediately available, up to `capacity` bytes.
pub fn drain_available<P: SerialLink>(port: &mut P, capacity: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; capacity];
    let read = port.read(&mut buf)?;
    buf.truncate(read);
    Ok(buf)
}

/// Accumulate up to `count` bytes, pulled one at a time, until the deadline.
///
/// Bytes are fetched individually so inter-character gaps are observed per
/// byte. A timeout returns whatever accumulated; filling `capacity` before
/// `count` is satisfied is fatal.
pub fn read_count<P: SerialLink>(
    port: &mut P,
    count: usize,
    timeout: Duration,
    capacity: usize,
) -> Result<Vec<u8>> {
    let deadline = Deadline::after(timeout);
    let mut collected = Vec::new();
    while !deadline.expired() {
        while port.available()? > 0 {
            if collected.len() >= capacity {
                return Err(EngineError::ReadOverflow {
                    capacity,
                    collected: hex::encode_upper(&collected),
                });
            }
            let mut byte = [0u8; 1];
            if port.read(&mut byte)? == 1 {
                collected.push(byte[0]);
            }
            if collected.len() >= count {
                return Ok(collected);
            }
        }
        deadline.nap();
    }
    Ok(collected)
}

/// Accumulate bytes one at a time until a newline arrives or the deadline
/// passes; the newline is included in the result.
pub fn read_line<P: SerialLink>(
    port: &mut P,
    timeout: Duration,
    capacity: usize,
) -> Result<Vec<u8>> {
    let deadline = Deadline::after(timeout);
    let mut collected = Vec::new();
    while !deadline.expired() {
        while port.available()? > 0 {
            if collected.len() >= capacity {
                return Err(EngineError::ReadOverflow {
                    capacity,
                    collected: hex::encode_upper(&collected),
                });
            }
            let mut byte = [0u8; 1];
            if port.read(&mut byte)? == 1 {
                collected.push(byte[0]);
                if byte[0] == b'\n' {
                    return Ok(collected);
                }
            }
        }
        deadline.nap();
    }
    Ok(collected)
}

/// Poll until at least `count` bytes are available or the deadline passes.
/// Returns the availability observed last.
pub fn wait_available<P: SerialLink>(
    port: &mut P,
    count: usize,
    timeout: Duration,
) -> Result<usize> {
    let deadline = Deadline::after(timeout);
    loop {
        let available = port.available()?;
        if available >= count || deadline.expired() {
            return Ok(available);
        }
        deadline.nap();
    }
}
