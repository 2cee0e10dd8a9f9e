use serbridge_channel::{ByteSink, ByteSource, ChannelError, SerialLink, SerialOpener};
use serbridge_frame::{read_frame, write_frame};
use serbridge_modbus::{
    append_crc, crc_matches, declared_len, set_declared_len, ModbusError, ENCAP_HEADER_LEN,
    MIN_REQUEST_LEN, MIN_RTU_FRAME,
};

use crate::error::{EngineError, Result};
use crate::session::{write_serial, Session};
use crate::timed::POLL_QUANTUM;

/// Continuous forwarding protocols selected by the `l` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Console frames to serial verbatim; serial batches back as frames.
    Raw,
    /// Serial bytes reassembled into newline-terminated lines.
    Text,
    /// Encapsulated console requests translated to RTU and back.
    Gateway,
    /// Bare RTU requests from the console, CRC framing handled here.
    Master,
    /// The serial side initiates; requests forwarded to the console.
    Slave,
}

/// Which channels have data to service.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub console: bool,
    pub serial: bool,
}

/// Block until at least one channel is readable.
fn wait_ready<C, P>(console: &mut C, serial: &mut P) -> Result<Readiness>
where
    C: ByteSource,
    P: SerialLink,
{
    loop {
        let readiness = Readiness {
            console: console.readable()?,
            serial: serial.readable()?,
        };
        if readiness.console || readiness.serial {
            return Ok(readiness);
        }
        std::thread::sleep(POLL_QUANTUM);
    }
}

/// Borrowed channel ends and the capacity in force when the loop started.
struct LoopContext<'a, CI, CO, P> {
    console_in: &'a mut CI,
    console_out: &'a mut CO,
    serial: &'a mut P,
    capacity: usize,
}

/// Per-mode event handlers over mode-local state.
///
/// The multiplexer invokes each handler exactly once per readiness event;
/// a handler runs to completion before the channels are checked again.
trait LoopHandler {
    fn on_console_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink;

    fn on_serial_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink;
}

/// Forward one console frame to serial; short writes are fatal.
fn console_frame_to_serial<CI, CO, P>(ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
where
    CI: ByteSource,
    CO: ByteSink,
    P: SerialLink,
{
    let payload = read_frame(ctx.console_in, ctx.capacity)?;
    write_serial(ctx.serial, &payload)
}

struct RawLoop;

impl LoopHandler for RawLoop {
    fn on_console_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink,
    {
        console_frame_to_serial(ctx)
    }

    fn on_serial_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink,
    {
        let mut input = vec![0u8; ctx.capacity];
        let read = ctx.serial.read(&mut input)?;
        write_frame(ctx.console_out, &input[..read])?;
        Ok(())
    }
}

#[derive(Default)]
struct TextLoop {
    line: Vec<u8>,
}

impl LoopHandler for TextLoop {
    fn on_console_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink,
    {
        console_frame_to_serial(ctx)
    }

    fn on_serial_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink,
    {
        let mut input = vec![0u8; ctx.capacity];
        let read = ctx.serial.read(&mut input)?;
        for (i, &byte) in input[..read].iter().enumerate() {
            self.line.push(byte);
            if byte == b'\n' {
                write_frame(ctx.console_out, &self.line)?;
                self.line.clear();
            } else if self.line.len() >= ctx.capacity {
                return Err(EngineError::LineOverflow {
                    capacity: ctx.capacity,
                    line: hex::encode_upper(&self.line),
                    pending: hex::encode_upper(&input[i + 1..read]),
                });
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct GatewayLoop {
    /// The outstanding request's encapsulation header plus the response
    /// bytes accumulating behind it; `None` while no request is out.
    pending: Option<Vec<u8>>,
}

impl LoopHandler for GatewayLoop {
    fn on_console_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink,
    {
        let mut frame = read_frame(ctx.console_in, ctx.capacity)?;
        if frame.len() < ENCAP_HEADER_LEN {
            return Err(EngineError::EncapTooShort { len: frame.len() });
        }
        let declared = declared_len(&frame) + ENCAP_HEADER_LEN;
        if declared != frame.len() {
            return Err(EngineError::EncapLengthMismatch {
                declared,
                actual: frame.len(),
            });
        }
        if frame.len() + 2 > ctx.capacity {
            return Err(ModbusError::CrcOverflow {
                needed: frame.len() + 2,
                capacity: ctx.capacity,
            }
            .into());
        }

        let mut rtu = frame.split_off(ENCAP_HEADER_LEN);
        append_crc(&mut rtu);
        // Arm (or re-arm) response capture under this request's header.
        self.pending = Some(frame);
        write_serial(ctx.serial, &rtu)
    }

    fn on_serial_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink,
    {
        let mut input = vec![0u8; ctx.capacity];
        let read = ctx.serial.read(&mut input)?;
        let Some(frame) = self.pending.as_mut() else {
            // No request outstanding: the serial side has no business talking.
            return Err(EngineError::UnsolicitedSerialData {
                data: hex::encode_upper(&input[..read]),
            });
        };
        for (i, &byte) in input[..read].iter().enumerate() {
            frame.push(byte);
            if frame.len() >= ENCAP_HEADER_LEN + MIN_RTU_FRAME
                && crc_matches(&frame[ENCAP_HEADER_LEN..])
            {
                frame.truncate(frame.len() - 2);
                let payload_len = frame.len() - ENCAP_HEADER_LEN;
                set_declared_len(&mut frame[..], payload_len);
                write_frame(ctx.console_out, &frame[..])?;
                let leftover = &input[i + 1..read];
                if !leftover.is_empty() {
                    return Err(EngineError::ResidualSerialData {
                        data: hex::encode_upper(leftover),
                    });
                }
                self.pending = None;
                return Ok(());
            }
            if frame.len() >= ctx.capacity {
                return Err(EngineError::ResponseOverflow {
                    capacity: ctx.capacity,
                    collected: hex::encode_upper(&frame[..]),
                    pending: hex::encode_upper(&input[i + 1..read]),
                });
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct MasterLoop {
    /// Response bytes of the outstanding request; `None` while idle.
    pending: Option<Vec<u8>>,
}

impl LoopHandler for MasterLoop {
    fn on_console_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink,
    {
        let mut rtu = read_frame(ctx.console_in, ctx.capacity)?;
        if rtu.len() < MIN_REQUEST_LEN {
            return Err(ModbusError::RequestTooShort { len: rtu.len() }.into());
        }
        if rtu.len() + 2 > ctx.capacity {
            return Err(ModbusError::CrcOverflow {
                needed: rtu.len() + 2,
                capacity: ctx.capacity,
            }
            .into());
        }
        append_crc(&mut rtu);
        self.pending = Some(Vec::new());
        write_serial(ctx.serial, &rtu)
    }

    fn on_serial_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink,
    {
        let mut input = vec![0u8; ctx.capacity];
        let read = ctx.serial.read(&mut input)?;
        let Some(response) = self.pending.as_mut() else {
            return Err(EngineError::UnsolicitedSerialData {
                data: hex::encode_upper(&input[..read]),
            });
        };
        for (i, &byte) in input[..read].iter().enumerate() {
            response.push(byte);
            if response.len() >= MIN_RTU_FRAME && crc_matches(response) {
                response.truncate(response.len() - 2);
                write_frame(ctx.console_out, &response[..])?;
                let leftover = &input[i + 1..read];
                if !leftover.is_empty() {
                    return Err(EngineError::ResidualSerialData {
                        data: hex::encode_upper(leftover),
                    });
                }
                self.pending = None;
                return Ok(());
            }
            if response.len() >= ctx.capacity {
                return Err(EngineError::ResponseOverflow {
                    capacity: ctx.capacity,
                    collected: hex::encode_upper(&response[..]),
                    pending: hex::encode_upper(&input[i + 1..read]),
                });
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct SlaveLoop {
    /// Request bytes accumulating from the serial master. Capture is
    /// always armed: the remote side may talk whenever it likes.
    request: Vec<u8>,
}

impl LoopHandler for SlaveLoop {
    fn on_console_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink,
    {
        let mut rtu = read_frame(ctx.console_in, ctx.capacity)?;
        if rtu.len() + 2 > ctx.capacity {
            return Err(ModbusError::CrcOverflow {
                needed: rtu.len() + 2,
                capacity: ctx.capacity,
            }
            .into());
        }
        append_crc(&mut rtu);
        write_serial(ctx.serial, &rtu)
    }

    fn on_serial_ready<CI, CO, P>(&mut self, ctx: &mut LoopContext<'_, CI, CO, P>) -> Result<()>
    where
        CI: ByteSource,
        CO: ByteSink,
        P: SerialLink,
    {
        let mut input = vec![0u8; ctx.capacity];
        let read = ctx.serial.read(&mut input)?;
        for (i, &byte) in input[..read].iter().enumerate() {
            self.request.push(byte);
            if self.request.len() >= MIN_RTU_FRAME && crc_matches(&self.request) {
                self.request.truncate(self.request.len() - 2);
                write_frame(ctx.console_out, &self.request)?;
                // Bytes after the match begin the next request.
                self.request.clear();
                continue;
            }
            if self.request.len() >= ctx.capacity {
                return Err(EngineError::ResponseOverflow {
                    capacity: ctx.capacity,
                    collected: hex::encode_upper(&self.request),
                    pending: hex::encode_upper(&input[i + 1..read]),
                });
            }
        }
        Ok(())
    }
}

impl<CI, CO, O> Session<CI, CO, O>
where
    CI: ByteSource,
    CO: ByteSink,
    O: SerialOpener,
{
    /// Hand control to a loop mode permanently; only a fatal error returns.
    pub fn run_loop(&mut self, mode: LoopMode) -> Result<()> {
        match mode {
            LoopMode::Raw => self.drive(RawLoop),
            LoopMode::Text => self.drive(TextLoop::default()),
            LoopMode::Gateway => self.drive(GatewayLoop::default()),
            LoopMode::Master => self.drive(MasterLoop::default()),
            LoopMode::Slave => self.drive(SlaveLoop::default()),
        }
    }

    fn drive<H: LoopHandler>(&mut self, mut handler: H) -> Result<()> {
        let capacity = self.config.capacity;
        let serial = self.port.as_mut().ok_or(ChannelError::NotOpen)?;
        let mut ctx = LoopContext {
            console_in: &mut self.console_in,
            console_out: &mut self.console_out,
            serial,
            capacity,
        };
        loop {
            let readiness = wait_ready(ctx.console_in, ctx.serial)?;
            if readiness.console {
                handler.on_console_ready(&mut ctx)?;
            }
            if readiness.serial {
                handler.on_serial_ready(&mut ctx)?;
            }
        }
    }
}
