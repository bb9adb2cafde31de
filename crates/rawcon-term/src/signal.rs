// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// Signal handoff — from an async signal handler to the dispatch loop.
//
// Almost nothing is safe inside a signal handler: no allocation, no locks,
// no logging, no terminal queries. So the handler we install does exactly
// two things and returns:
//
//   1. sets bit N of a process-wide `AtomicU64` (lock-free `fetch_or`)
//   2. writes one byte to a non-blocking self-pipe
//
// The dispatch loop polls the pipe's read end alongside everything else.
// When it wakes it drains the pipe and atomically claims the pending bits
// for the signals it has callbacks for, then runs those callbacks in the
// normal execution context where they may do anything.
//
// The bitmask is the source of truth; the pipe only wakes the loop. Bits
// coalesce, so two deliveries of the same signal before the loop wakes
// produce one callback. That matches how POSIX treats standard signals
// anyway.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Signals that happened and haven't been claimed yet. Bit N = signal N.
static PENDING: AtomicU64 = AtomicU64::new(0);

/// Write end of the wake pipe, read by the handler. -1 until created.
static WAKE_WRITE: AtomicI32 = AtomicI32::new(-1);

/// Read end of the wake pipe. Created on first use, never closed.
static WAKE_READ: OnceLock<RawFd> = OnceLock::new();

/// Highest signal number the bitmask can hold.
pub const MAX_SIGNAL: libc::c_int = 63;

/// The bitmask bit for `signo`. Zero for numbers outside `1..=63`.
#[inline]
#[must_use]
pub const fn signal_bit(signo: libc::c_int) -> u64 {
    if signo >= 1 && signo <= MAX_SIGNAL {
        1 << signo
    } else {
        0
    }
}

/// Check that `signo` can carry a callback.
///
/// # Errors
///
/// [`Error::Registration`] for numbers outside `1..=63` and for
/// `SIGKILL` / `SIGSTOP`, which cannot be caught.
pub fn validate(signo: libc::c_int) -> Result<()> {
    if signal_bit(signo) == 0 {
        return Err(Error::Registration(format!(
            "signal {signo} is outside 1..={MAX_SIGNAL}"
        )));
    }
    if signo == libc::SIGKILL || signo == libc::SIGSTOP {
        return Err(Error::Registration(format!("signal {signo} cannot be caught")));
    }
    Ok(())
}

// ─── Handler ─────────────────────────────────────────────────────────────────

/// The installed handler. Async-signal-safe: one atomic RMW, one `write(2)`,
/// errno preserved.
extern "C" fn record_signal(signo: libc::c_int) {
    let saved = errno::get();

    PENDING.fetch_or(signal_bit(signo), Ordering::SeqCst);

    let fd = WAKE_WRITE.load(Ordering::Relaxed);
    if fd >= 0 {
        // The byte's value is informational only.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let byte = signo as u8;
        unsafe {
            // A full pipe means the loop is already due to wake.
            let _ = libc::write(fd, (&raw const byte).cast(), 1);
        }
    }

    errno::set(saved);
}

mod errno {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe fn location() -> *mut libc::c_int {
        unsafe { libc::__errno_location() }
    }

    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    unsafe fn location() -> *mut libc::c_int {
        unsafe { libc::__error() }
    }

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    ))]
    pub fn get() -> libc::c_int {
        unsafe { *location() }
    }

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    ))]
    pub fn set(value: libc::c_int) {
        unsafe { *location() = value }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    )))]
    pub const fn get() -> libc::c_int {
        0
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    )))]
    pub const fn set(_value: libc::c_int) {}
}

// ─── Disposition ─────────────────────────────────────────────────────────────

/// A saved signal disposition, to put back later.
#[derive(Clone, Copy)]
pub struct SavedAction(libc::sigaction);

/// Install `handler` for `signo`, returning the previous disposition.
///
/// # Errors
///
/// Returns the OS error if `sigaction` fails.
pub fn set_handler(
    signo: libc::c_int,
    handler: extern "C" fn(libc::c_int),
) -> io::Result<SavedAction> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&raw mut sa.sa_mask);

        let mut previous: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signo, &raw const sa, &raw mut previous) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(SavedAction(previous))
    }
}

/// Route `signo` through the pending bitmask.
///
/// Creates the wake pipe on first use.
///
/// # Errors
///
/// Returns the OS error if the pipe or `sigaction` fails.
pub fn install(signo: libc::c_int) -> io::Result<SavedAction> {
    wake_fd()?;
    set_handler(signo, record_signal)
}

/// Put back a disposition returned by [`install`] or [`set_handler`].
///
/// # Errors
///
/// Returns the OS error if `sigaction` fails.
pub fn restore(signo: libc::c_int, saved: &SavedAction) -> io::Result<()> {
    unsafe {
        if libc::sigaction(signo, &raw const saved.0, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Reset `signo` to the default disposition. Async-signal-safe.
pub fn reset_default(signo: libc::c_int) {
    unsafe {
        libc::signal(signo, libc::SIG_DFL);
    }
}

/// Whether `signo` currently has the default disposition.
#[must_use]
pub fn is_default(signo: libc::c_int) -> bool {
    unsafe {
        let mut current: libc::sigaction = std::mem::zeroed();
        libc::sigaction(signo, std::ptr::null(), &raw mut current) == 0
            && current.sa_sigaction == libc::SIG_DFL
    }
}

// ─── Pending Set ─────────────────────────────────────────────────────────────

/// Claim the pending signals in `mask`, clearing them. Signals outside
/// `mask` stay pending for whoever owns them.
#[inline]
pub fn take_pending(mask: u64) -> u64 {
    PENDING.fetch_and(!mask, Ordering::SeqCst) & mask
}

/// Pending signals in `mask`, without clearing them.
#[inline]
#[must_use]
pub fn peek_pending(mask: u64) -> u64 {
    PENDING.load(Ordering::SeqCst) & mask
}

/// Mark `signo` pending as if it had been delivered.
#[cfg(test)]
fn mark_pending(signo: libc::c_int) {
    PENDING.fetch_or(signal_bit(signo), Ordering::SeqCst);
}

// ─── Wake Pipe ───────────────────────────────────────────────────────────────

/// The wake pipe's read end, created (non-blocking, close-on-exec) on
/// first call.
///
/// # Errors
///
/// Returns the OS error if the pipe cannot be created.
pub fn wake_fd() -> io::Result<RawFd> {
    if let Some(&fd) = WAKE_READ.get() {
        return Ok(fd);
    }

    let mut fds = [0 as RawFd; 2];
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in fds {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }
    }

    if WAKE_READ.set(fds[0]).is_ok() {
        WAKE_WRITE.store(fds[1], Ordering::SeqCst);
        log::debug!("signal wake pipe created: read={} write={}", fds[0], fds[1]);
        Ok(fds[0])
    } else {
        // Lost a race with another thread; keep theirs.
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
        WAKE_READ
            .get()
            .copied()
            .ok_or_else(|| io::Error::other("wake pipe vanished"))
    }
}

/// Empty the wake pipe. Returns how many bytes were discarded.
pub fn drain_wake(fd: RawFd) -> usize {
    let mut buf = [0u8; 64];
    let mut total = 0;
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            break;
        }
        #[allow(clippy::cast_sign_loss)] // n > 0 checked above.
        {
            total += n as usize;
        }
    }
    total
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // Signal numbers here are picked so they don't collide with the event
    // loop tests running in parallel.

    #[test]
    fn bits() {
        assert_eq!(signal_bit(1), 2);
        assert_eq!(signal_bit(libc::SIGINT), 1 << libc::SIGINT);
        assert_eq!(signal_bit(0), 0);
        assert_eq!(signal_bit(64), 0);
        assert_eq!(signal_bit(-1), 0);
    }

    #[test]
    fn validation() {
        assert!(validate(libc::SIGINT).is_ok());
        assert!(validate(libc::SIGWINCH).is_ok());
        assert!(validate(0).is_err());
        assert!(validate(64).is_err());
        assert!(validate(libc::SIGKILL).is_err());
        assert!(validate(libc::SIGSTOP).is_err());
    }

    #[test]
    fn take_claims_only_masked_bits() {
        // Bits 60 and 61 are beyond any real signal on Linux and macOS.
        mark_pending(60);
        mark_pending(61);
        assert_eq!(peek_pending(signal_bit(60)), signal_bit(60));

        assert_eq!(take_pending(signal_bit(60)), signal_bit(60));
        assert_eq!(peek_pending(signal_bit(60)), 0);
        assert_eq!(peek_pending(signal_bit(61)), signal_bit(61));

        assert_eq!(take_pending(signal_bit(61)), signal_bit(61));
    }

    #[test]
    fn wake_pipe_is_created_once() {
        let a = wake_fd().unwrap();
        let b = wake_fd().unwrap();
        assert_eq!(a, b);
        assert!(a >= 0);
    }

    #[test]
    fn handler_records_and_wakes() {
        let fd = wake_fd().unwrap();
        // Call the handler directly; no signal needs to be delivered.
        record_signal(62);
        assert_eq!(take_pending(signal_bit(62)), signal_bit(62));
        // Another test may have drained concurrently, so only check that
        // draining never blocks.
        let _ = drain_wake(fd);
    }

    #[test]
    fn install_and_restore_round_trip() {
        let signo = libc::SIGTTIN;
        assert!(is_default(signo));
        let saved = install(signo).unwrap();
        assert!(!is_default(signo));
        restore(signo, &saved).unwrap();
        assert!(is_default(signo));
    }
}
