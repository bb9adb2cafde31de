// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// The terminal device — raw reads and writes on the process's stdio fds.
//
// Writes go straight to fd 1 with `write(2)`, bypassing Rust's stdout
// buffer so a query is on the wire the moment we ask for it. Reads come
// from fd 0 and are bounded: each `read` first `poll`s with the configured
// timeout and reports `Ok(0)` if nothing arrived. That bound holds whether
// or not raw mode's `VTIME` is in effect, so a terminal that never answers
// a query costs at most one timeout, never a hang.

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Convert a timeout to `poll(2)` milliseconds, rounding up so a short
/// nonzero wait never turns into a busy spin.
#[must_use]
pub fn poll_timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
        }
    }
}

/// Wait until `fd` is readable or `timeout` passes.
///
/// Returns `Ok(true)` when data (or hangup) is pending. `EINTR` counts as
/// "not ready" so the caller can treat it like a timeout.
///
/// # Errors
///
/// Returns the OS error if `poll` fails for any other reason.
pub fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let ready = unsafe { libc::poll(&raw mut pfd, 1, poll_timeout_ms(Some(timeout))) };

    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ready > 0)
}

/// Handle on the terminal's input and output descriptors.
#[derive(Debug, Clone, Copy)]
pub struct Tty {
    input: RawFd,
    output: RawFd,
    read_timeout: Duration,
}

impl Tty {
    /// stdin for input, stdout for output.
    #[must_use]
    pub const fn stdio(read_timeout: Duration) -> Self {
        Self::from_fds(libc::STDIN_FILENO, libc::STDOUT_FILENO, read_timeout)
    }

    /// Arbitrary descriptors. The caller keeps ownership; `Tty` never closes them.
    #[must_use]
    pub const fn from_fds(input: RawFd, output: RawFd, read_timeout: Duration) -> Self {
        Self {
            input,
            output,
            read_timeout,
        }
    }

    #[inline]
    #[must_use]
    pub const fn input_fd(&self) -> RawFd {
        self.input
    }

    #[inline]
    #[must_use]
    pub const fn output_fd(&self) -> RawFd {
        self.output
    }

    #[inline]
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

impl Read for Tty {
    /// Read whatever is available, waiting at most the read timeout.
    /// `Ok(0)` means the timeout passed (or EOF).
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || !wait_readable(self.input, self.read_timeout)? {
            return Ok(0);
        }

        let n = unsafe { libc::read(self.input, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        #[allow(clippy::cast_sign_loss)] // n >= 0 checked above.
        Ok(n as usize)
    }
}

impl Write for Tty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(self.output, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        #[allow(clippy::cast_sign_loss)] // n >= 0 checked above.
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Unbuffered: every write is already a syscall.
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
