// SPDX-License-Identifier: MIT
//
// Console — stateful convenience layer over a terminal device.
//
// Tracks the current foreground/background color and exposes the cursor
// position as a get/set pair: setting emits a move, getting asks the
// terminal through `QueryProtocol`. Every escape sequence goes through
// `ansi.rs` into a scratch buffer and reaches the device in one write.
//
// When the output is not a capable terminal (piped, redirected, TERM=dumb)
// the console degrades: no escape byte is ever emitted, text is written
// plain, queries report the zero value, and key reads return nothing.

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;

use crate::ansi::{self, Attr, ClearRange};
use crate::color::ColorCode;
use crate::config::Config;
use crate::device::Tty;
use crate::error::{Error, Result};
use crate::input;
use crate::query::{Position, QueryProtocol, Size};
use crate::terminal::{self, RawTerminal};

/// Options for [`Console::print`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintOptions<'a> {
    /// Move here first. A column above 1 also becomes the left margin for
    /// every line after the first.
    pub at: Option<Position>,
    pub foreground: Option<ColorCode>,
    pub background: Option<ColorCode>,
    /// Written after the text.
    pub terminator: &'a str,
}

impl Default for PrintOptions<'_> {
    fn default() -> Self {
        Self {
            at: None,
            foreground: None,
            background: None,
            terminator: "\n",
        }
    }
}

impl PrintOptions<'_> {
    #[must_use]
    pub const fn at(mut self, pos: Position) -> Self {
        self.at = Some(pos);
        self
    }

    #[must_use]
    pub const fn foreground(mut self, color: ColorCode) -> Self {
        self.foreground = Some(color);
        self
    }

    #[must_use]
    pub const fn background(mut self, color: ColorCode) -> Self {
        self.background = Some(color);
        self
    }
}

impl<'a> PrintOptions<'a> {
    #[must_use]
    pub const fn terminator(mut self, terminator: &'a str) -> Self {
        self.terminator = terminator;
        self
    }
}

/// Append `text`, turning each newline into newline + move right to
/// column `margin`.
fn push_indented(out: &mut Vec<u8>, text: &str, margin: u16) {
    if margin <= 1 {
        out.extend_from_slice(text.as_bytes());
        return;
    }
    let mut lines = text.split('\n');
    if let Some(first) = lines.next() {
        out.extend_from_slice(first.as_bytes());
    }
    for line in lines {
        out.push(b'\n');
        // Writing to a Vec cannot fail.
        let _ = ansi::cursor_right(out, i32::from(margin) - 1);
        out.extend_from_slice(line.as_bytes());
    }
}

// ─── Console ────────────────────────────────────────────────────────────────

/// A terminal with current-color and cursor-position state.
///
/// # Example
///
/// ```no_run
/// use rawcon_term::{ColorCode, Config, Console, Position, PrintOptions};
///
/// let mut console = Console::stdio(&Config::from_env())?;
/// let size = console.size();
/// console.print(
///     &format!("{size}"),
///     &PrintOptions::default()
///         .at(Position::new(4, 2))
///         .foreground(ColorCode::rgb(255, 128, 0)),
/// )?;
/// # Ok::<(), rawcon_term::Error>(())
/// ```
pub struct Console<D: Read + Write = Tty> {
    device: D,
    capable: bool,
    query: QueryProtocol,
    foreground: ColorCode,
    background: ColorCode,
    scratch: Vec<u8>,
    /// Declared last so the device is flushed before the mode is restored.
    raw: Option<RawTerminal>,
}

impl Console<Tty> {
    /// The process's stdin/stdout.
    ///
    /// If they form a capable terminal, switches to raw mode (restored on
    /// drop, at exit, and on SIGINT). Otherwise the console runs degraded.
    ///
    /// The SIGINT restore is only installed if SIGINT still has its
    /// default disposition when the first console goes raw. A program
    /// that sets up its own SIGINT handling first keeps it, and then owns
    /// restoring the terminal on interrupt (dropping the console does).
    /// Handlers registered afterwards, such as an event loop's, take over
    /// while they are registered and put the restore back when cancelled.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the terminal is capable but raw mode cannot be
    /// entered.
    pub fn stdio(config: &Config) -> Result<Self> {
        let capable = terminal::detect_capability(config);
        let mut console = Self::with_device(Tty::stdio(config.read_timeout), capable, config);
        if capable {
            let mut raw = RawTerminal::new(config);
            raw.enable_raw()?;
            console.raw = Some(raw);
        }
        log::info!(
            "console on stdio ({})",
            if capable { "raw" } else { "degraded: not a capable terminal" }
        );
        Ok(console)
    }

    /// Descriptor to watch for key presses.
    #[inline]
    #[must_use]
    pub const fn input_fd(&self) -> RawFd {
        self.device.input_fd()
    }

    /// Leave raw mode now instead of on drop.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the attributes cannot be restored.
    pub fn restore(&mut self) -> io::Result<()> {
        self.flush()?;
        match self.raw.as_mut() {
            Some(raw) => raw.disable_raw(),
            None => Ok(()),
        }
    }
}

impl<D: Read + Write> Console<D> {
    /// A console over any device. `capable` decides whether escape
    /// sequences are emitted; the device's mode is left alone.
    pub fn with_device(device: D, capable: bool, config: &Config) -> Self {
        Self {
            device,
            capable,
            query: QueryProtocol::new(config),
            foreground: ColorCode::WHITE,
            background: ColorCode::BLACK,
            scratch: Vec::with_capacity(64),
            raw: None,
        }
    }

    /// Whether escape sequences are in effect.
    #[inline]
    #[must_use]
    pub const fn is_tty(&self) -> bool {
        self.capable
    }

    #[inline]
    pub const fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub const fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Encode one escape sequence and send it, if capable.
    fn emit<F>(&mut self, encode: F) -> io::Result<()>
    where
        F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
    {
        if !self.capable {
            return Ok(());
        }
        self.scratch.clear();
        encode(&mut self.scratch)?;
        self.device.write_all(&self.scratch)?;
        self.device.flush()
    }

    // ── Colors ──────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub const fn foreground(&self) -> ColorCode {
        self.foreground
    }

    #[inline]
    #[must_use]
    pub const fn background(&self) -> ColorCode {
        self.background
    }

    /// Set the text color and emit it.
    ///
    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn set_foreground(&mut self, color: ColorCode) -> io::Result<()> {
        self.foreground = color;
        self.emit(|w| ansi::fg(w, color))
    }

    /// Set the background color and emit it.
    ///
    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn set_background(&mut self, color: ColorCode) -> io::Result<()> {
        self.background = color;
        self.emit(|w| ansi::bg(w, color))
    }

    /// Turn attributes on or off.
    ///
    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn set_attrs(&mut self, attr: Attr, on: bool) -> io::Result<()> {
        self.emit(|w| ansi::attrs(w, attr, on))
    }

    /// All attributes and colors back to the terminal's defaults.
    ///
    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn reset(&mut self) -> io::Result<()> {
        self.foreground = ColorCode::WHITE;
        self.background = ColorCode::BLACK;
        self.emit(ansi::reset)
    }

    // ── Cursor ──────────────────────────────────────────────────

    /// Ask the terminal where the cursor is.
    ///
    /// # Errors
    ///
    /// [`Error::NotATty`] when degraded; otherwise whatever
    /// [`QueryProtocol::cursor_position`] reports.
    pub fn try_position(&mut self) -> Result<Position> {
        if !self.capable {
            return Err(Error::NotATty);
        }
        self.flush()?;
        self.query.cursor_position(&mut self.device)
    }

    /// Cursor position, or `(0, 0)` if it cannot be determined.
    pub fn position(&mut self) -> Position {
        self.try_position().unwrap_or_else(|e| {
            log::debug!("position query failed: {e}");
            Position::ZERO
        })
    }

    /// Move the cursor. Coordinates are 1-based.
    ///
    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn set_position(&mut self, pos: Position) -> io::Result<()> {
        self.emit(|w| ansi::cursor_to(w, i32::from(pos.x), i32::from(pos.y)))
    }

    /// Terminal dimensions, measured by moving the cursor to the far
    /// corner and asking where it landed.
    ///
    /// # Errors
    ///
    /// [`Error::NotATty`] when degraded; otherwise whatever
    /// [`QueryProtocol::size`] reports.
    pub fn try_size(&mut self) -> Result<Size> {
        if !self.capable {
            return Err(Error::NotATty);
        }
        self.flush()?;
        self.query.size(&mut self.device)
    }

    /// Terminal dimensions, or `0x0` if they cannot be determined.
    pub fn size(&mut self) -> Size {
        self.try_size().unwrap_or_else(|e| {
            log::debug!("size query failed: {e}");
            Size::ZERO
        })
    }

    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn cursor_home(&mut self) -> io::Result<()> {
        self.emit(ansi::cursor_home)
    }

    /// Relative move; negative `dx` goes left, negative `dy` goes up.
    ///
    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn move_by(&mut self, dx: i32, dy: i32) -> io::Result<()> {
        self.emit(|w| {
            match dx {
                0 => {}
                n if n > 0 => ansi::cursor_right(w, n)?,
                n => ansi::cursor_left(w, n.saturating_neg())?,
            }
            match dy {
                0 => Ok(()),
                n if n > 0 => ansi::cursor_down(w, n),
                n => ansi::cursor_up(w, n.saturating_neg()),
            }
        })
    }

    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn save_cursor(&mut self) -> io::Result<()> {
        self.emit(ansi::save_cursor)
    }

    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn restore_cursor(&mut self) -> io::Result<()> {
        self.emit(ansi::restore_cursor)
    }

    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn hide_cursor(&mut self) -> io::Result<()> {
        self.emit(ansi::cursor_hide)
    }

    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn show_cursor(&mut self) -> io::Result<()> {
        self.emit(ansi::cursor_show)
    }

    // ── Screen ──────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn clear_screen(&mut self, range: ClearRange) -> io::Result<()> {
        self.emit(|w| ansi::clear_screen(w, range))
    }

    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn clear_line(&mut self, range: ClearRange) -> io::Result<()> {
        self.emit(|w| ansi::clear_line(w, range))
    }

    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn set_title(&mut self, title: &str) -> io::Result<()> {
        self.emit(|w| ansi::set_title(w, title))
    }

    // ── Text ────────────────────────────────────────────────────

    /// Write `text` followed by `options.terminator`.
    ///
    /// Colors given in `options` become the current colors. With
    /// `options.at`, the cursor moves there first, and if its column is
    /// above 1, each line after the first starts at that same column.
    /// Degraded consoles write the text and terminator unchanged.
    ///
    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn print(&mut self, text: &str, options: &PrintOptions<'_>) -> io::Result<()> {
        self.scratch.clear();
        let mut margin = 1;

        if self.capable {
            if let Some(color) = options.foreground {
                self.foreground = color;
                ansi::fg(&mut self.scratch, color)?;
            }
            if let Some(color) = options.background {
                self.background = color;
                ansi::bg(&mut self.scratch, color)?;
            }
            if let Some(at) = options.at {
                ansi::cursor_to(&mut self.scratch, i32::from(at.x), i32::from(at.y))?;
                margin = at.x;
            }
        } else {
            if let Some(color) = options.foreground {
                self.foreground = color;
            }
            if let Some(color) = options.background {
                self.background = color;
            }
        }

        push_indented(&mut self.scratch, text, margin);
        push_indented(&mut self.scratch, options.terminator, margin);
        self.device.write_all(&self.scratch)?;
        self.device.flush()
    }

    /// [`print`](Self::print) with default options.
    ///
    /// # Errors
    ///
    /// Returns the device's write error.
    pub fn println(&mut self, text: &str) -> io::Result<()> {
        self.print(text, &PrintOptions::default())
    }

    // ── Input ───────────────────────────────────────────────────

    /// Read one key press as a character.
    ///
    /// Keys that were typed while a position query was waiting for its
    /// reply come first. `None` if nothing arrived within the read
    /// timeout, or always when degraded.
    ///
    /// # Errors
    ///
    /// Returns the device's read error.
    pub fn read_char(&mut self) -> io::Result<Option<char>> {
        if !self.capable {
            return Ok(None);
        }
        let mut reader = HeldInput {
            query: &mut self.query,
            device: &mut self.device,
        };
        input::read_char(&mut reader)
    }

    /// Whether input read during a position query is waiting for
    /// [`read_char`](Self::read_char). The device will not report it as
    /// readable again.
    #[inline]
    #[must_use]
    pub fn has_pending_input(&self) -> bool {
        self.query.has_unread()
    }

    /// # Errors
    ///
    /// Returns the device's flush error.
    pub fn flush(&mut self) -> io::Result<()> {
        self.device.flush()
    }
}

/// Input held back by the query protocol, then the device.
struct HeldInput<'a, D> {
    query: &'a mut QueryProtocol,
    device: &'a mut D,
}

impl<D: Read> Read for HeldInput<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.query.has_unread() {
            return Ok(self.query.read_unread(buf));
        }
        self.device.read(buf)
    }
}

impl<D: Read + Write> Drop for Console<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.flush() {
            log::warn!("console flush on drop failed: {e}");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
