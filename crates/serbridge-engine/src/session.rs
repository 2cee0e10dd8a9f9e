use std::time::Duration;

use serbridge_channel::{
    ByteSink, ByteSource, ChannelError, SerialLink, SerialOpener, SerialSettings,
};
use serbridge_frame::{read_frame, write_frame};
use serbridge_modbus::{transact, Reply, TIMEOUT_SENTINEL};
use tracing::debug;

use crate::command::CommandBuffer;
use crate::error::{EngineError, Result};
use crate::loops::LoopMode;
use crate::timed;

/// Session-wide settings, mutated only by configuration commands.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Negotiated buffer capacity: the largest accepted frame payload and
    /// the bound on every accumulation buffer.
    pub capacity: usize,
    /// Per-command narration on stderr.
    pub debug: bool,
    /// Inter-byte packet timeout hint handed to the serial device.
    pub packet_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: 255,
            debug: false,
            packet_timeout: Duration::ZERO,
        }
    }
}

/// One bridge session: the console halves, at most one open serial port,
/// and the configuration the command stream mutates.
pub struct Session<CI, CO, O>
where
    CI: ByteSource,
    CO: ByteSink,
    O: SerialOpener,
{
    pub(crate) config: SessionConfig,
    pub(crate) console_in: CI,
    pub(crate) console_out: CO,
    pub(crate) opener: O,
    pub(crate) port: Option<O::Port>,
}

/// Write `payload` to the port in one call; anything short is fatal.
pub(crate) fn write_serial<P: SerialLink>(port: &mut P, payload: &[u8]) -> Result<()> {
    let written = port.write(payload)?;
    if written != payload.len() {
        return Err(EngineError::ShortSerialWrite {
            expected: payload.len(),
            written,
        });
    }
    Ok(())
}

impl<CI, CO, O> Session<CI, CO, O>
where
    CI: ByteSource,
    CO: ByteSink,
    O: SerialOpener,
{
    pub fn new(console_in: CI, console_out: CO, opener: O) -> Self {
        Self {
            config: SessionConfig::default(),
            console_in,
            console_out,
            opener,
            port: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Borrow the console output sink.
    pub fn console_out(&self) -> &CO {
        &self.console_out
    }

    /// Drop the serial port, closing the device if one is open.
    pub fn shutdown(&mut self) {
        self.port = None;
    }

    /// Read the next command buffer off the console.
    pub fn read_command(&mut self) -> Result<Vec<u8>> {
        Ok(read_frame(&mut self.console_in, self.config.capacity)?)
    }

    /// Serve the console: execute `initial` if present, then dispatch
    /// framed command buffers until a fatal error.
    pub fn run(&mut self, initial: Option<&[u8]>) -> Result<()> {
        if let Some(buffer) = initial {
            self.dispatch(buffer)?;
        }
        loop {
            let buffer = self.read_command()?;
            self.dispatch(&buffer)?;
        }
    }

    /// Execute one command buffer to completion.
    ///
    /// A `l` command hands control to its loop mode and only comes back
    /// with the error that ended the process's useful life.
    pub fn dispatch(&mut self, buffer: &[u8]) -> Result<()> {
        let mut cmd = CommandBuffer::new(buffer);
        while !cmd.is_exhausted() {
            let start = cmd.position();
            let opcode = cmd.read_char()?;
            if self.config.debug {
                debug!(opcode = %(opcode as char), index = start, "command");
            }
            match opcode {
                b'e' => self.cmd_echo(&mut cmd)?,
                b'd' => self.cmd_set_debug(&mut cmd)?,
                b'o' => self.cmd_open(&mut cmd)?,
                b'c' => self.cmd_close()?,
                b'b' => self.cmd_set_capacity(&mut cmd)?,
                b'i' => self.cmd_set_packet_timeout(&mut cmd)?,
                b'l' => return self.cmd_start_loop(&mut cmd),
                b'w' => self.cmd_write(&mut cmd)?,
                b'r' => self.cmd_read(&mut cmd)?,
                b'n' => self.cmd_read_line(&mut cmd)?,
                b'a' => self.cmd_available()?,
                b'f' => self.cmd_flush(&mut cmd)?,
                b's' => self.cmd_wait(&mut cmd)?,
                b'p' => self.cmd_pause(&mut cmd)?,
                b'm' => self.cmd_modbus(&mut cmd)?,
                other => {
                    return Err(EngineError::UnknownCommand {
                        opcode: other as char,
                        index: start,
                    })
                }
            }
        }
        Ok(())
    }

    fn port(&mut self) -> Result<&mut O::Port> {
        self.port
            .as_mut()
            .ok_or(EngineError::Channel(ChannelError::NotOpen))
    }

    fn cmd_echo(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        let byte = cmd.read_char()?;
        write_frame(&mut self.console_out, &[byte])?;
        Ok(())
    }

    fn cmd_set_debug(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        self.config.debug = cmd.read_digit()? != 0;
        Ok(())
    }

    fn cmd_open(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        let name = cmd.read_str_until(b',')?.to_vec();
        let baud = cmd.read_str_until(b',')?.to_vec();
        let line = cmd.read_str_n(3)?.to_vec();
        if self.port.is_some() {
            return Err(ChannelError::AlreadyOpen.into());
        }
        let name = String::from_utf8_lossy(&name).into_owned();
        let settings = SerialSettings::parse(
            &String::from_utf8_lossy(&baud),
            &String::from_utf8_lossy(&line),
        )?;
        let mut port = self.opener.open(&name, &settings)?;
        // Stale queues from a previous occupant are nobody's traffic.
        port.discard()?;
        if self.config.debug {
            debug!(port = %name, baud = settings.baud, "serial open");
        }
        self.port = Some(port);
        Ok(())
    }

    fn cmd_close(&mut self) -> Result<()> {
        if self.port.take().is_none() {
            return Err(ChannelError::NotOpen.into());
        }
        if self.config.debug {
            debug!("serial close");
        }
        Ok(())
    }

    fn cmd_set_capacity(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        let capacity = cmd.read_uint()? as usize;
        if capacity == 0 {
            return Err(EngineError::ZeroCapacity);
        }
        self.config.capacity = capacity;
        Ok(())
    }

    fn cmd_set_packet_timeout(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        let timeout = Duration::from_millis(cmd.read_uint()?);
        self.config.packet_timeout = timeout;
        self.port()?.set_packet_timeout(timeout)?;
        Ok(())
    }

    fn cmd_start_loop(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        let start = cmd.position();
        let mode = match cmd.read_char()? {
            b'r' => LoopMode::Raw,
            b't' => LoopMode::Text,
            b'g' => LoopMode::Gateway,
            b'm' => LoopMode::Master,
            b's' => LoopMode::Slave,
            other => {
                return Err(EngineError::InvalidLoopMode {
                    mode: other as char,
                    index: start,
                })
            }
        };
        debug!(?mode, "entering loop");
        self.run_loop(mode)
    }

    /// `w`: one console frame forwarded to serial.
    fn cmd_write(&mut self, _cmd: &mut CommandBuffer) -> Result<()> {
        let payload = read_frame(&mut self.console_in, self.config.capacity)?;
        write_serial(self.port()?, &payload)
    }

    /// `r`: timed read; a zero count drains what is currently available.
    fn cmd_read(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        let count = cmd.read_uint()? as usize;
        let _sep = cmd.read_char()?;
        let timeout = Duration::from_millis(cmd.read_uint()?);
        let capacity = self.config.capacity;
        let payload = if count == 0 {
            timed::drain_available(self.port()?, capacity)?
        } else {
            timed::read_count(self.port()?, count, timeout, capacity)?
        };
        write_frame(&mut self.console_out, &payload)?;
        Ok(())
    }

    /// `n`: timed read until newline.
    fn cmd_read_line(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        let timeout = Duration::from_millis(cmd.read_uint()?);
        let capacity = self.config.capacity;
        let payload = timed::read_line(self.port()?, timeout, capacity)?;
        write_frame(&mut self.console_out, &payload)?;
        Ok(())
    }

    /// `a`: reply with the available-byte count in decimal.
    fn cmd_available(&mut self) -> Result<()> {
        let available = self.port()?.available()?;
        write_frame(&mut self.console_out, format!("a{available}").as_bytes())?;
        Ok(())
    }

    fn cmd_flush(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        let start = cmd.position();
        match cmd.read_char()? {
            b'd' => self.port()?.discard()?,
            b't' => self.port()?.drain()?,
            other => {
                return Err(EngineError::InvalidFlushMode {
                    mode: other as char,
                    index: start,
                })
            }
        }
        Ok(())
    }

    /// `s`: block until the availability threshold or the deadline, then
    /// reply with the observed count in decimal.
    fn cmd_wait(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        let count = cmd.read_uint()? as usize;
        let _sep = cmd.read_char()?;
        let timeout = Duration::from_millis(cmd.read_uint()?);
        let available = timed::wait_available(self.port()?, count, timeout)?;
        write_frame(&mut self.console_out, format!("s{available}").as_bytes())?;
        Ok(())
    }

    fn cmd_pause(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        let millis = cmd.read_uint()?;
        if self.config.debug {
            debug!(millis, "pause");
        }
        std::thread::sleep(Duration::from_millis(millis));
        Ok(())
    }

    /// `m`: one RTU transaction over the next console frame.
    fn cmd_modbus(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        let _sep = cmd.read_char()?;
        let timeout = Duration::from_millis(cmd.read_uint()?);
        let request = read_frame(&mut self.console_in, self.config.capacity)?;
        let capacity = self.config.capacity;
        let reply = transact(self.port()?, &request, timeout, capacity)?;
        match reply {
            Reply::Response(payload) => write_frame(&mut self.console_out, &payload)?,
            Reply::TimedOut => write_frame(&mut self.console_out, TIMEOUT_SENTINEL)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serbridge_channel::Result as ChannelResult;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ConsoleScript {
        data: Vec<u8>,
        pos: usize,
    }

    impl ConsoleScript {
        fn with_frames<T: AsRef<[u8]>>(frames: &[T]) -> Self {
            let mut data = Vec::new();
            for frame in frames {
                let frame = frame.as_ref();
                data.extend_from_slice(&(frame.len() as u16).to_be_bytes());
                data.extend_from_slice(frame);
            }
            Self { data, pos: 0 }
        }
    }

    impl ByteSource for ConsoleScript {
        fn available(&mut self) -> ChannelResult<usize> {
            Ok(self.data.len() - self.pos)
        }

        fn read(&mut self, buf: &mut [u8]) -> ChannelResult<usize> {
            let n = (self.data.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[derive(Default)]
    struct ConsoleLog(Vec<u8>);

    impl ConsoleLog {
        /// Split the recorded byte stream back into frame payloads.
        fn frames(&self) -> Vec<Vec<u8>> {
            let mut frames = Vec::new();
            let mut rest = &self.0[..];
            while rest.len() >= 2 {
                let len = usize::from(rest[0]) << 8 | usize::from(rest[1]);
                frames.push(rest[2..2 + len].to_vec());
                rest = &rest[2 + len..];
            }
            assert!(rest.is_empty(), "trailing partial frame in console log");
            frames
        }
    }

    impl ByteSink for ConsoleLog {
        fn write(&mut self, buf: &[u8]) -> ChannelResult<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[derive(Default)]
    struct PortState {
        rx: Vec<u8>,
        pos: usize,
        tx: Vec<u8>,
        discards: usize,
        drains: usize,
        packet_timeout: Option<Duration>,
    }

    #[derive(Clone, Default)]
    struct SharedPort(Arc<Mutex<PortState>>);

    impl SharedPort {
        fn preload(&self, bytes: &[u8]) {
            self.0.lock().unwrap().rx.extend_from_slice(bytes);
        }

        fn tx(&self) -> Vec<u8> {
            self.0.lock().unwrap().tx.clone()
        }

        fn discards(&self) -> usize {
            self.0.lock().unwrap().discards
        }
    }

    impl ByteSource for SharedPort {
        fn available(&mut self) -> ChannelResult<usize> {
            let state = self.0.lock().unwrap();
            Ok(state.rx.len() - state.pos)
        }

        fn read(&mut self, buf: &mut [u8]) -> ChannelResult<usize> {
            let mut state = self.0.lock().unwrap();
            let n = (state.rx.len() - state.pos).min(buf.len());
            let pos = state.pos;
            buf[..n].copy_from_slice(&state.rx[pos..pos + n]);
            state.pos += n;
            Ok(n)
        }
    }

    impl ByteSink for SharedPort {
        fn write(&mut self, buf: &[u8]) -> ChannelResult<usize> {
            self.0.lock().unwrap().tx.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    impl SerialLink for SharedPort {
        fn discard(&mut self) -> ChannelResult<()> {
            let mut state = self.0.lock().unwrap();
            state.discards += 1;
            state.pos = state.rx.len();
            Ok(())
        }

        fn drain(&mut self) -> ChannelResult<()> {
            self.0.lock().unwrap().drains += 1;
            Ok(())
        }

        fn set_packet_timeout(&mut self, timeout: Duration) -> ChannelResult<()> {
            self.0.lock().unwrap().packet_timeout = Some(timeout);
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubOpener {
        port: SharedPort,
        opened: Vec<(String, SerialSettings)>,
    }

    impl SerialOpener for StubOpener {
        type Port = SharedPort;

        fn open(&mut self, path: &str, settings: &SerialSettings) -> ChannelResult<SharedPort> {
            self.opened.push((path.to_string(), *settings));
            Ok(self.port.clone())
        }
    }

    type TestSession = Session<ConsoleScript, ConsoleLog, StubOpener>;

    fn session() -> TestSession {
        Session::new(
            ConsoleScript::default(),
            ConsoleLog::default(),
            StubOpener::default(),
        )
    }

    fn open_session() -> (TestSession, SharedPort) {
        let mut session = session();
        session.dispatch(b"ottyUSB0,9600,8N1").unwrap();
        let port = session.opener.port.clone();
        (session, port)
    }

    #[test]
    fn echo_replies_one_byte_frame() {
        let mut session = session();
        session.dispatch(b"eZ").unwrap();
        assert_eq!(session.console_out.frames(), vec![b"Z".to_vec()]);
    }

    #[test]
    fn multiple_commands_in_one_buffer() {
        let mut session = session();
        session.dispatch(b"eXeY").unwrap();
        assert_eq!(
            session.console_out.frames(),
            vec![b"X".to_vec(), b"Y".to_vec()]
        );
    }

    #[test]
    fn debug_flag_toggles() {
        let mut session = session();
        session.dispatch(b"d1").unwrap();
        assert!(session.config.debug);
        session.dispatch(b"d0").unwrap();
        assert!(!session.config.debug);
    }

    #[test]
    fn unknown_opcode_reports_index() {
        let mut session = session();
        let err = session.dispatch(b"eXq").unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownCommand {
                opcode: 'q',
                index: 2
            }
        ));
    }

    #[test]
    fn open_parses_name_baud_and_line_config() {
        let (session, _port) = open_session();
        assert_eq!(session.opener.opened.len(), 1);
        let (path, settings) = &session.opener.opened[0];
        assert_eq!(path, "ttyUSB0");
        assert_eq!(settings.baud, 9600);
    }

    #[test]
    fn open_discards_stale_queues() {
        let (_session, port) = open_session();
        assert_eq!(port.discards(), 1);
    }

    #[test]
    fn open_twice_is_fatal() {
        let (mut session, _port) = open_session();
        let err = session.dispatch(b"ottyUSB0,9600,8N1").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Channel(ChannelError::AlreadyOpen)
        ));
    }

    #[test]
    fn close_without_open_is_fatal() {
        let mut session = session();
        let err = session.dispatch(b"c").unwrap_err();
        assert!(matches!(err, EngineError::Channel(ChannelError::NotOpen)));
    }

    #[test]
    fn close_then_reopen_is_allowed() {
        let (mut session, _port) = open_session();
        session.dispatch(b"c").unwrap();
        session.dispatch(b"ottyUSB1,19200,7E1").unwrap();
        assert_eq!(session.opener.opened.len(), 2);
    }

    #[test]
    fn open_rejects_bad_baud() {
        let mut session = session();
        let err = session.dispatch(b"ottyUSB0,333,8N1").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Channel(ChannelError::InvalidBaud(_))
        ));
    }

    #[test]
    fn capacity_must_be_positive() {
        let mut session = session();
        let err = session.dispatch(b"b0").unwrap_err();
        assert!(matches!(err, EngineError::ZeroCapacity));
        session.dispatch(b"b512").unwrap();
        assert_eq!(session.config.capacity, 512);
    }

    #[test]
    fn capacity_bounds_received_frames() {
        let mut session = session();
        session.dispatch(b"b4").unwrap();
        session.console_in = ConsoleScript::with_frames(&[b"12345"]);
        let err = session.read_command().unwrap_err();
        assert!(matches!(
            err,
            EngineError::Frame(serbridge_frame::FrameError::OversizeFrame { size: 5, max: 4 })
        ));
    }

    #[test]
    fn packet_timeout_requires_open_port() {
        let mut session = session();
        let err = session.dispatch(b"i100").unwrap_err();
        assert!(matches!(err, EngineError::Channel(ChannelError::NotOpen)));
    }

    #[test]
    fn packet_timeout_reaches_the_device() {
        let (mut session, port) = open_session();
        session.dispatch(b"i250").unwrap();
        assert_eq!(
            port.0.lock().unwrap().packet_timeout,
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn write_forwards_next_frame_to_serial() {
        let (mut session, port) = open_session();
        session.console_in = ConsoleScript::with_frames(&[b"\x01\x02\x03"]);
        session.dispatch(b"w").unwrap();
        assert_eq!(port.tx(), vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn read_zero_count_drains_available() {
        let (mut session, port) = open_session();
        port.preload(b"pending");
        session.dispatch(b"r0,10").unwrap();
        assert_eq!(session.console_out.frames(), vec![b"pending".to_vec()]);
    }

    #[test]
    fn read_counted_returns_exactly_count() {
        let (mut session, port) = open_session();
        port.preload(b"abcdef");
        session.dispatch(b"r4,50").unwrap();
        assert_eq!(session.console_out.frames(), vec![b"abcd".to_vec()]);
    }

    #[test]
    fn read_times_out_with_empty_frame() {
        let (mut session, _port) = open_session();
        session.dispatch(b"r3,20").unwrap();
        assert_eq!(session.console_out.frames(), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn read_line_returns_through_newline() {
        let (mut session, port) = open_session();
        port.preload(b"one\ntwo");
        session.dispatch(b"n50").unwrap();
        assert_eq!(session.console_out.frames(), vec![b"one\n".to_vec()]);
    }

    #[test]
    fn available_replies_decimal_count() {
        let (mut session, port) = open_session();
        port.preload(b"12345");
        session.dispatch(b"a").unwrap();
        assert_eq!(session.console_out.frames(), vec![b"a5".to_vec()]);
    }

    #[test]
    fn wait_replies_observed_count() {
        let (mut session, port) = open_session();
        port.preload(b"abc");
        session.dispatch(b"s2,50").unwrap();
        assert_eq!(session.console_out.frames(), vec![b"s3".to_vec()]);
    }

    #[test]
    fn wait_timeout_replies_partial_count() {
        let (mut session, _port) = open_session();
        session.dispatch(b"s2,20").unwrap();
        assert_eq!(session.console_out.frames(), vec![b"s0".to_vec()]);
    }

    #[test]
    fn flush_modes_reach_the_device() {
        let (mut session, port) = open_session();
        session.dispatch(b"fdft").unwrap();
        let state = port.0.lock().unwrap();
        assert_eq!(state.discards, 2); // one from open, one from fd
        assert_eq!(state.drains, 1);
    }

    #[test]
    fn flush_rejects_unknown_mode() {
        let (mut session, _port) = open_session();
        let err = session.dispatch(b"fx").unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidFlushMode {
                mode: 'x',
                index: 1
            }
        ));
    }

    #[test]
    fn modbus_command_round_trips() {
        let (mut session, port) = open_session();
        let request = [0x11, 0x03, 0x00, 0x6B];
        let response = [0x11, 0x03, 0x02, 0x12, 0x34];
        let mut framed = response.to_vec();
        serbridge_modbus::append_crc(&mut framed);
        port.preload(&framed);

        session.console_in = ConsoleScript::with_frames(&[&request]);
        session.dispatch(b"m,100").unwrap();

        let mut expected_tx = request.to_vec();
        serbridge_modbus::append_crc(&mut expected_tx);
        assert_eq!(port.tx(), expected_tx);
        assert_eq!(session.console_out.frames(), vec![response.to_vec()]);
    }

    #[test]
    fn modbus_timeout_replies_sentinel() {
        let (mut session, _port) = open_session();
        session.console_in = ConsoleScript::with_frames(&[&[0x11, 0x03, 0x00, 0x6B]]);
        session.dispatch(b"m,20").unwrap();
        assert_eq!(session.console_out.frames(), vec![b"me".to_vec()]);
    }

    #[test]
    fn serial_commands_without_port_are_fatal() {
        for buffer in [&b"r1,10"[..], b"n10", b"a", b"fd", b"s1,10", b"w"] {
            let mut session = session();
            if buffer == b"w" {
                session.console_in = ConsoleScript::with_frames(&[b"x"]);
            }
            let err = session.dispatch(buffer).unwrap_err();
            assert!(
                matches!(err, EngineError::Channel(ChannelError::NotOpen)),
                "buffer {buffer:?}"
            );
        }
    }

    #[test]
    fn run_executes_initial_buffer_then_frames() {
        let mut session = session();
        session.console_in = ConsoleScript::with_frames(&[b"eB"]);
        let err = session.run(Some(b"eA")).unwrap_err();
        // The script ends, so the next header read is a short read.
        assert!(matches!(
            err,
            EngineError::Frame(serbridge_frame::FrameError::ShortRead { .. })
        ));
        assert_eq!(
            session.console_out.frames(),
            vec![b"A".to_vec(), b"B".to_vec()]
        );
    }

    #[test]
    fn grammar_failure_mid_buffer_reports_index() {
        let mut session = session();
        let err = session.dispatch(b"eXbx").unwrap_err();
        assert!(matches!(err, EngineError::ExpectedNumber { index: 3 }));
    }
}
