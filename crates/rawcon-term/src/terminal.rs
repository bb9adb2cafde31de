// SPDX-License-Identifier: MIT
//
// Terminal mode control — raw mode, capability detection, and cleanup.
//
// Safety: This module necessarily uses `unsafe` for termios (tcgetattr,
// tcsetattr), isatty, atexit, and raw fd writes. These are the standard
// POSIX interfaces for terminal control; there is no safe alternative.
// Each unsafe block is minimal.
#![allow(unsafe_code)]
//
// "Raw" here is the light variant: canonical line editing and echo off,
// reads returning after VMIN=0 bytes or a VTIME inter-byte timeout, so a
// read never blocks forever. ISIG stays on, which means Ctrl-C still
// raises SIGINT.
//
// Restoring the terminal has to work from three places: `disable_raw`,
// process exit (atexit), and the SIGINT handler. The SIGINT handler is
// only installed while SIGINT has its default disposition; a handler the
// program set up earlier, or an inherited SIG_IGN, is left in place. The last one rules out
// locks and allocation, so the original attributes live in a `OnceLock`
// (set once, read with a plain atomic load) and an `AtomicBool` says
// whether a restore is owed. `restore_terminal` does two syscalls that
// are on the async-signal-safe list: tcsetattr and write.

use std::env;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Once, OnceLock};

use crate::ansi;
use crate::config::Config;
use crate::signal;

// ─── Capability ─────────────────────────────────────────────────────────────

/// Whether `fd` refers to a terminal.
#[must_use]
pub fn is_tty(fd: RawFd) -> bool {
    unsafe { libc::isatty(fd) != 0 }
}

/// Whether this process talks to a terminal that understands escape
/// sequences: stdin and stdout are both terminals and `TERM` is set to
/// something outside [`Config::incapable_terms`].
#[must_use]
pub fn detect_capability(config: &Config) -> bool {
    is_tty(libc::STDIN_FILENO)
        && is_tty(libc::STDOUT_FILENO)
        && config.term_is_capable(env::var("TERM").ok().as_deref())
}

// ─── Process-Wide Restore ───────────────────────────────────────────────────

/// Attributes captured before the first switch to raw mode.
static ORIGINAL: OnceLock<libc::termios> = OnceLock::new();

/// Set while the process-wide terminal is in raw mode.
static RAW_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Guards one-time registration of the exit and SIGINT hooks.
static HOOKS_INSTALLED: Once = Once::new();

/// Restore the captured attributes and show the cursor.
///
/// Idempotent, and safe to call from a signal handler: no allocation, no
/// locks, only `tcsetattr` and `write`.
pub fn restore_terminal() {
    if !RAW_ACTIVE.swap(false, Ordering::SeqCst) {
        return;
    }
    if let Some(original) = ORIGINAL.get() {
        unsafe {
            let _ = libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, original);
            let _ = libc::write(
                libc::STDOUT_FILENO,
                ansi::SHOW_CURSOR.as_ptr().cast(),
                ansi::SHOW_CURSOR.len(),
            );
        }
    }
}

extern "C" fn restore_at_exit() {
    restore_terminal();
}

/// SIGINT: put the terminal back, then die the way SIGINT normally kills.
extern "C" fn restore_on_interrupt(signo: libc::c_int) {
    restore_terminal();
    signal::reset_default(signo);
    unsafe {
        libc::raise(signo);
    }
}

/// Install [`restore_on_interrupt`] for `signo` unless something else
/// already handles it. Returns whether the hook went in.
fn install_interrupt_hook(signo: libc::c_int) -> io::Result<bool> {
    if !signal::is_default(signo) {
        return Ok(false);
    }
    signal::set_handler(signo, restore_on_interrupt)?;
    Ok(true)
}

fn install_hooks() {
    HOOKS_INSTALLED.call_once(|| {
        unsafe {
            if libc::atexit(restore_at_exit) != 0 {
                log::warn!("atexit registration failed; terminal may stay raw on exit");
            }
        }
        match install_interrupt_hook(libc::SIGINT) {
            Ok(true) => {}
            Ok(false) => log::debug!("SIGINT already handled, restore hook not installed"),
            Err(e) => log::warn!("SIGINT hook not installed: {e}"),
        }
    });
}

// ─── Mode Control ───────────────────────────────────────────────────────────

/// Current terminal input mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalMode {
    /// Line-buffered with echo (the shell's mode).
    #[default]
    Canonical,
    /// Unbuffered, no echo, bounded reads.
    Raw,
}

/// Access to a terminal's attributes.
///
/// [`StdioControl`] talks to the real stdin/stdout; tests substitute an
/// in-memory one.
pub trait ModeControl {
    /// Read the current attributes.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the attributes cannot be read.
    fn get_attrs(&mut self) -> io::Result<libc::termios>;

    /// Apply attributes immediately.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the attributes cannot be applied.
    fn set_attrs(&mut self, attrs: &libc::termios) -> io::Result<()>;

    /// Write a control sequence straight to the terminal.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the write fails.
    fn write_control(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Called after entering raw mode, with the attributes to restore.
    fn arm_restore(&mut self, _original: &libc::termios) {}

    /// Called before leaving raw mode.
    fn disarm_restore(&mut self) {}
}

/// The process's own stdin/stdout, with exit and SIGINT hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioControl;

impl ModeControl for StdioControl {
    fn get_attrs(&mut self) -> io::Result<libc::termios> {
        unsafe {
            let mut termios: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(libc::STDIN_FILENO, &raw mut termios) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(termios)
        }
    }

    fn set_attrs(&mut self, attrs: &libc::termios) -> io::Result<()> {
        unsafe {
            if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, attrs) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn write_control(&mut self, bytes: &[u8]) -> io::Result<()> {
        let n = unsafe { libc::write(libc::STDOUT_FILENO, bytes.as_ptr().cast(), bytes.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn arm_restore(&mut self, original: &libc::termios) {
        // First capture wins: that's the shell's mode.
        let _ = ORIGINAL.set(*original);
        RAW_ACTIVE.store(true, Ordering::SeqCst);
        install_hooks();
    }

    fn disarm_restore(&mut self) {
        RAW_ACTIVE.store(false, Ordering::SeqCst);
    }
}

// ─── RawTerminal ────────────────────────────────────────────────────────────

/// Owns the terminal's input mode.
///
/// [`enable_raw`](Self::enable_raw) captures the original attributes the
/// first time and switches to raw mode; [`disable_raw`](Self::disable_raw)
/// puts them back verbatim. Both are idempotent. Dropping the handle
/// restores the terminal, so an unwinding panic still leaves the shell
/// usable.
///
/// # Example
///
/// ```no_run
/// use rawcon_term::{Config, RawTerminal};
///
/// let mut term = RawTerminal::new(&Config::default());
/// term.enable_raw()?;
/// // ... talk to the terminal ...
/// term.disable_raw()?;
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct RawTerminal<C: ModeControl = StdioControl> {
    control: C,
    original: Option<libc::termios>,
    mode: TerminalMode,
    min_bytes: u8,
    vtime: u8,
}

impl RawTerminal<StdioControl> {
    /// Handle on the process's stdin/stdout. Does not change the mode.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_control(StdioControl, config)
    }
}

impl<C: ModeControl> RawTerminal<C> {
    /// Handle over an arbitrary [`ModeControl`].
    #[must_use]
    pub fn with_control(control: C, config: &Config) -> Self {
        Self {
            control,
            original: None,
            mode: TerminalMode::Canonical,
            min_bytes: config.min_read_bytes,
            vtime: config.vtime(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn mode(&self) -> TerminalMode {
        self.mode
    }

    #[inline]
    #[must_use]
    pub fn is_raw(&self) -> bool {
        self.mode == TerminalMode::Raw
    }

    /// Access to the underlying control, mainly for tests.
    #[inline]
    pub const fn control(&self) -> &C {
        &self.control
    }

    /// Switch to raw mode and hide the cursor.
    ///
    /// The original attributes are captured only once per handle, so
    /// enabling twice and disabling once leaves nothing of raw mode behind.
    /// No-op if already raw.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the attributes cannot be read or applied, or
    /// the hide-cursor sequence cannot be written.
    pub fn enable_raw(&mut self) -> io::Result<()> {
        if self.is_raw() {
            return Ok(());
        }

        let original = match self.original {
            Some(original) => original,
            None => {
                let captured = self.control.get_attrs()?;
                self.original = Some(captured);
                captured
            }
        };

        let mut raw = original;
        raw.c_lflag &= !(libc::ICANON | libc::ECHO);
        raw.c_cc[libc::VMIN] = self.min_bytes;
        raw.c_cc[libc::VTIME] = self.vtime;

        self.control.set_attrs(&raw)?;
        self.control.arm_restore(&original);
        self.mode = TerminalMode::Raw;
        log::debug!("raw mode on (VMIN={}, VTIME={})", self.min_bytes, self.vtime);

        self.control.write_control(ansi::HIDE_CURSOR)
    }

    /// Restore the original attributes and show the cursor.
    ///
    /// No-op if raw mode was never enabled or is already off.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the attributes cannot be applied or the
    /// show-cursor sequence cannot be written.
    pub fn disable_raw(&mut self) -> io::Result<()> {
        if !self.is_raw() {
            return Ok(());
        }
        let Some(original) = self.original else {
            return Ok(());
        };

        self.control.disarm_restore();
        self.control.set_attrs(&original)?;
        self.mode = TerminalMode::Canonical;
        log::debug!("raw mode off");

        self.control.write_control(ansi::SHOW_CURSOR)
    }
}

impl<C: ModeControl> Drop for RawTerminal<C> {
    fn drop(&mut self) {
        if let Err(e) = self.disable_raw() {
            log::warn!("terminal restore on drop failed: {e}");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// A terminal that exists only in memory.
    struct FakeControl {
        attrs: libc::termios,
        reads: usize,
        written: Vec<u8>,
        armed: bool,
    }

    impl FakeControl {
        fn new() -> Self {
            let mut attrs: libc::termios = unsafe { std::mem::zeroed() };
            attrs.c_lflag = libc::ICANON | libc::ECHO | libc::ISIG;
            attrs.c_cc[libc::VMIN] = 1;
            attrs.c_cc[libc::VTIME] = 0;
            Self {
                attrs,
                reads: 0,
                written: Vec::new(),
                armed: false,
            }
        }
    }

    impl ModeControl for FakeControl {
        fn get_attrs(&mut self) -> io::Result<libc::termios> {
            self.reads += 1;
            Ok(self.attrs)
        }

        fn set_attrs(&mut self, attrs: &libc::termios) -> io::Result<()> {
            self.attrs = *attrs;
            Ok(())
        }

        fn write_control(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.written.extend_from_slice(bytes);
            Ok(())
        }

        fn arm_restore(&mut self, _original: &libc::termios) {
            self.armed = true;
        }

        fn disarm_restore(&mut self) {
            self.armed = false;
        }
    }

    fn snapshot(t: &libc::termios) -> (libc::tcflag_t, libc::tcflag_t, libc::cc_t, libc::cc_t) {
        (t.c_lflag, t.c_iflag, t.c_cc[libc::VMIN], t.c_cc[libc::VTIME])
    }

    fn fake_terminal() -> RawTerminal<FakeControl> {
        RawTerminal::with_control(FakeControl::new(), &Config::default())
    }

    // ── Raw mode ────────────────────────────────────────────────

    #[test]
    fn enable_clears_canonical_and_echo() {
        let mut term = fake_terminal();
        term.enable_raw().unwrap();

        let attrs = term.control().attrs;
        assert_eq!(attrs.c_lflag & libc::ICANON, 0);
        assert_eq!(attrs.c_lflag & libc::ECHO, 0);
        assert_ne!(attrs.c_lflag & libc::ISIG, 0, "Ctrl-C must still signal");
        assert_eq!(attrs.c_cc[libc::VMIN], 0);
        assert_eq!(attrs.c_cc[libc::VTIME], 5);
        assert!(term.is_raw());
        assert!(term.control().armed);
    }

    #[test]
    fn enable_hides_cursor_disable_shows_it() {
        let mut term = fake_terminal();
        term.enable_raw().unwrap();
        term.disable_raw().unwrap();
        assert_eq!(term.control().written, b"\x1b[?25l\x1b[?25h");
    }

    #[test]
    fn enable_twice_disable_once_restores_fully() {
        let mut term = fake_terminal();
        let before = snapshot(&term.control().attrs);

        term.enable_raw().unwrap();
        term.enable_raw().unwrap();
        assert_eq!(term.control().reads, 1, "original captured exactly once");

        term.disable_raw().unwrap();
        assert_eq!(snapshot(&term.control().attrs), before);
        assert_eq!(term.mode(), TerminalMode::Canonical);
        assert!(!term.control().armed);
    }

    #[test]
    fn disable_without_enable_is_noop() {
        let mut term = fake_terminal();
        let before = snapshot(&term.control().attrs);
        term.disable_raw().unwrap();
        assert_eq!(snapshot(&term.control().attrs), before);
        assert!(term.control().written.is_empty());
    }

    #[test]
    fn disable_twice_is_noop() {
        let mut term = fake_terminal();
        term.enable_raw().unwrap();
        term.disable_raw().unwrap();
        term.disable_raw().unwrap();
        assert_eq!(term.control().written, b"\x1b[?25l\x1b[?25h");
    }

    #[test]
    fn re_enable_reuses_original_capture() {
        let mut term = fake_terminal();
        let before = snapshot(&term.control().attrs);
        for _ in 0..3 {
            term.enable_raw().unwrap();
            term.disable_raw().unwrap();
        }
        assert_eq!(term.control().reads, 1);
        assert_eq!(snapshot(&term.control().attrs), before);
    }

    #[test]
    fn custom_timeout_reaches_vtime() {
        let config = Config::default().with_read_timeout(std::time::Duration::from_millis(250));
        let mut term = RawTerminal::with_control(FakeControl::new(), &config);
        term.enable_raw().unwrap();
        assert_eq!(term.control().attrs.c_cc[libc::VTIME], 3);
    }

    // ── Process-wide restore ────────────────────────────────────

    #[test]
    fn restore_without_raw_is_noop() {
        // RAW_ACTIVE is only ever set by StdioControl, which these tests
        // never arm, so this must not touch the real terminal.
        restore_terminal();
        restore_terminal();
        assert!(!RAW_ACTIVE.load(Ordering::SeqCst));
    }

    // These use signals nothing else in the crate touches, since
    // dispositions are process-wide and tests run in parallel.

    fn current_handler(signo: libc::c_int) -> libc::sighandler_t {
        unsafe {
            let mut current: libc::sigaction = std::mem::zeroed();
            assert_eq!(libc::sigaction(signo, std::ptr::null(), &raw mut current), 0);
            current.sa_sigaction
        }
    }

    fn hook_address() -> libc::sighandler_t {
        restore_on_interrupt as *const () as libc::sighandler_t
    }

    #[test]
    fn interrupt_hook_goes_in_over_default_disposition() {
        let signo = libc::SIGTTOU;
        signal::reset_default(signo);

        assert!(install_interrupt_hook(signo).unwrap());
        assert!(!signal::is_default(signo));
        assert_eq!(current_handler(signo), hook_address());

        signal::reset_default(signo);
    }

    #[test]
    fn interrupt_hook_leaves_existing_handler_alone() {
        let signo = libc::SIGXFSZ;
        let saved = signal::install(signo).unwrap();
        let before = current_handler(signo);

        assert!(!install_interrupt_hook(signo).unwrap());
        assert_eq!(current_handler(signo), before);
        assert_ne!(current_handler(signo), hook_address());

        signal::restore(signo, &saved).unwrap();
        assert!(signal::is_default(signo));
    }

    #[test]
    fn interrupt_hook_leaves_ignored_signal_ignored() {
        let signo = libc::SIGXCPU;
        unsafe {
            libc::signal(signo, libc::SIG_IGN);
        }

        assert!(!install_interrupt_hook(signo).unwrap());
        assert_eq!(current_handler(signo), libc::SIG_IGN);

        signal::reset_default(signo);
    }

    // ── Capability ──────────────────────────────────────────────

    #[test]
    fn pipe_is_not_a_tty() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        assert!(!is_tty(fds[0]));
        assert!(!is_tty(fds[1]));
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn detect_capability_does_not_panic() {
        let _ = detect_capability(&Config::default());
    }
}
