use std::io;
use std::os::fd::RawFd;

use tracing::trace;

use crate::error::Result;
use crate::traits::{ByteSink, ByteSource};

/// The read half of the console channel.
///
/// Reads block until at least one byte arrives; a zero-byte read means the
/// controlling process closed its end.
#[derive(Debug)]
pub struct ConsoleIn {
    fd: RawFd,
}

impl ConsoleIn {
    /// Console input over the process stdin descriptor.
    pub fn stdin() -> Self {
        Self {
            fd: libc::STDIN_FILENO,
        }
    }

    /// Console input over an arbitrary readable descriptor (pipes in tests).
    ///
    /// The descriptor stays owned by the caller.
    pub fn from_fd(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl ByteSource for ConsoleIn {
    fn available(&mut self) -> Result<usize> {
        let mut count: libc::c_int = 0;
        // SAFETY: `count` is a valid writable c_int for FIONREAD, and `fd`
        // is open for the lifetime of this channel.
        let rc = unsafe { libc::ioctl(self.fd, libc::FIONREAD as _, &mut count) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(count as usize)
    }

    fn readable(&mut self) -> Result<bool> {
        let mut fds = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: `fds` is a valid pollfd array of length 1; the zero
        // timeout makes this a non-blocking readiness probe.
        let rc = unsafe { libc::poll(&mut fds, 1, 0) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // A hung-up or errored descriptor counts as readable so the
        // zero-byte read that follows surfaces the short frame instead of
        // the loop spinning on an availability count stuck at zero.
        Ok(fds.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            // SAFETY: `buf` is a valid writable region of `buf.len()` bytes.
            let rc = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
            if rc >= 0 {
                let read = rc as usize;
                trace!(data = %hex::encode_upper(&buf[..read]), "con<");
                return Ok(read);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
    }
}

/// The write half of the console channel.
#[derive(Debug)]
pub struct ConsoleOut {
    fd: RawFd,
}

impl ConsoleOut {
    /// Console output over the process stdout descriptor.
    pub fn stdout() -> Self {
        Self {
            fd: libc::STDOUT_FILENO,
        }
    }

    /// Console output over an arbitrary writable descriptor (pipes in tests).
    ///
    /// The descriptor stays owned by the caller.
    pub fn from_fd(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl ByteSink for ConsoleOut {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        trace!(data = %hex::encode_upper(buf), "con>");
        loop {
            // SAFETY: `buf` is a valid readable region of `buf.len()` bytes.
            let rc = unsafe { libc::write(self.fd, buf.as_ptr().cast(), buf.len()) };
            if rc >= 0 {
                return Ok(rc as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
    }
}
