// SPDX-License-Identifier: MIT
//
// ANSI escape sequence generation.
//
// Pure functions that write escape sequences to any `impl Write`. No state,
// no decisions about when to emit; that's the `Console`'s job. This module
// just knows the byte-level encoding of every terminal command we need.
//
// Coordinates here are 1-based, exactly as the terminal sees them. Counts
// and coordinates below 1 clamp to 1: `ESC[0A` means "one" to most
// terminals anyway, and a negative number would be a malformed sequence.
//
// All functions return `io::Result` propagated from the underlying writer.
// In practice they never fail when writing to a `Vec<u8>`.

use std::io::{self, Write};

use bitflags::bitflags;

use crate::color::ColorCode;

/// Bell, terminates OSC strings.
pub const BEL: &str = "\x07";

/// The cursor position report request (DSR 6).
pub const REQUEST_POSITION: &[u8] = b"\x1b[6n";
/// Hide the cursor (DECTCEM reset).
pub const HIDE_CURSOR: &[u8] = b"\x1b[?25l";
/// Show the cursor (DECTCEM set).
pub const SHOW_CURSOR: &[u8] = b"\x1b[?25h";

#[inline]
fn at_least_one(n: i32) -> i32 {
    n.max(1)
}

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// Move the cursor to column `x`, row `y` (CUP).
#[inline]
pub fn cursor_to(w: &mut impl Write, x: i32, y: i32) -> io::Result<()> {
    write!(w, "\x1b[{};{}H", at_least_one(y), at_least_one(x))
}

/// Move the cursor to the top-left corner.
#[inline]
pub fn cursor_home(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[H")
}

/// Move the cursor up `n` rows (CUU).
#[inline]
pub fn cursor_up(w: &mut impl Write, n: i32) -> io::Result<()> {
    write!(w, "\x1b[{}A", at_least_one(n))
}

/// Move the cursor down `n` rows (CUD).
#[inline]
pub fn cursor_down(w: &mut impl Write, n: i32) -> io::Result<()> {
    write!(w, "\x1b[{}B", at_least_one(n))
}

/// Move the cursor right `n` columns (CUF).
#[inline]
pub fn cursor_right(w: &mut impl Write, n: i32) -> io::Result<()> {
    write!(w, "\x1b[{}C", at_least_one(n))
}

/// Move the cursor left `n` columns (CUB).
#[inline]
pub fn cursor_left(w: &mut impl Write, n: i32) -> io::Result<()> {
    write!(w, "\x1b[{}D", at_least_one(n))
}

/// Save the cursor position (DECSC).
#[inline]
pub fn save_cursor(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b7")
}

/// Restore the cursor position saved by [`save_cursor`] (DECRC).
#[inline]
pub fn restore_cursor(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b8")
}

#[inline]
pub fn cursor_hide(w: &mut impl Write) -> io::Result<()> {
    w.write_all(HIDE_CURSOR)
}

#[inline]
pub fn cursor_show(w: &mut impl Write) -> io::Result<()> {
    w.write_all(SHOW_CURSOR)
}

/// Ask the terminal to report the cursor position.
///
/// The reply arrives on the input stream as `ESC [ row ; col R`.
#[inline]
pub fn request_position(w: &mut impl Write) -> io::Result<()> {
    w.write_all(REQUEST_POSITION)
}

// ─── Clearing ────────────────────────────────────────────────────────────────

/// Which part of the screen or line to erase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearRange {
    /// From the cursor to the end (parameter 0).
    ToEnd,
    /// From the start to the cursor (parameter 1).
    ToStart,
    /// Everything (parameter 2).
    All,
}

impl ClearRange {
    const fn param(self) -> u8 {
        match self {
            Self::ToEnd => b'0',
            Self::ToStart => b'1',
            Self::All => b'2',
        }
    }
}

/// Erase in display (ED).
pub fn clear_screen(w: &mut impl Write, range: ClearRange) -> io::Result<()> {
    w.write_all(&[0x1b, b'[', range.param(), b'J'])
}

/// Erase in line (EL).
pub fn clear_line(w: &mut impl Write, range: ClearRange) -> io::Result<()> {
    w.write_all(&[0x1b, b'[', range.param(), b'K'])
}

// ─── Colors ──────────────────────────────────────────────────────────────────

/// Set the foreground color from the 256-color palette.
#[inline]
pub fn fg(w: &mut impl Write, color: ColorCode) -> io::Result<()> {
    write!(w, "\x1b[38;5;{}m", color.index())
}

/// Set the background color from the 256-color palette.
#[inline]
pub fn bg(w: &mut impl Write, color: ColorCode) -> io::Result<()> {
    write!(w, "\x1b[48;5;{}m", color.index())
}

/// Restore the terminal's default foreground.
#[inline]
pub fn default_fg(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[39m")
}

/// Restore the terminal's default background.
#[inline]
pub fn default_bg(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[49m")
}

/// Reset all SGR attributes (SGR 0).
#[inline]
pub fn normal(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[0m")
}

/// Full reset: attributes, then default foreground and background.
pub fn reset(w: &mut impl Write) -> io::Result<()> {
    normal(w)?;
    default_fg(w)?;
    default_bg(w)
}

// ─── Text Attributes ─────────────────────────────────────────────────────────

bitflags! {
    /// Text attributes that can be switched on and off individually.
    ///
    /// ```
    /// use rawcon_term::ansi::Attr;
    ///
    /// let style = Attr::BOLD | Attr::UNDERLINE;
    /// assert!(style.contains(Attr::BOLD));
    /// assert!(!style.contains(Attr::BLINK));
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Attr: u8 {
        /// SGR 1 / 21.
        const BOLD      = 1 << 0;
        /// SGR 4 / 24.
        const UNDERLINE = 1 << 1;
        /// SGR 5 / 25.
        const BLINK     = 1 << 2;
        /// SGR 7 / 27.
        const REVERSE   = 1 << 3;
    }
}

/// SGR codes for each attribute: `(flag, on, off)`.
const ATTR_CODES: [(Attr, &[u8], &[u8]); 4] = [
    (Attr::BOLD, b"1", b"21"),
    (Attr::UNDERLINE, b"4", b"24"),
    (Attr::BLINK, b"5", b"25"),
    (Attr::REVERSE, b"7", b"27"),
];

/// Switch attributes on (`on == true`) or off, as one CSI sequence.
///
/// Multiple attributes are semicolon-separated: `\x1b[1;4m` for
/// bold + underline. Does nothing if `attr` is empty.
pub fn attrs(w: &mut impl Write, attr: Attr, on: bool) -> io::Result<()> {
    if attr.is_empty() {
        return Ok(());
    }

    w.write_all(b"\x1b[")?;
    let mut first = true;
    for (flag, on_code, off_code) in ATTR_CODES {
        if attr.contains(flag) {
            if !first {
                w.write_all(b";")?;
            }
            w.write_all(if on { on_code } else { off_code })?;
            first = false;
        }
    }
    w.write_all(b"m")
}

// ─── Window ──────────────────────────────────────────────────────────────────

/// Set the window title (OSC 0).
///
/// Control characters in `title` are dropped: an embedded BEL or ESC
/// would end the OSC string early and leak the rest as visible text.
pub fn set_title(w: &mut impl Write, title: &str) -> io::Result<()> {
    w.write_all(b"\x1b]0;")?;
    for ch in title.chars().filter(|c| !c.is_control()) {
        let mut enc = [0u8; 4];
        w.write_all(ch.encode_utf8(&mut enc).as_bytes())?;
    }
    w.write_all(BEL.as_bytes())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn emit(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    // ── Cursor ──────────────────────────────────────────────────

    #[test]
    fn cursor_to_is_row_then_column() {
        assert_eq!(emit(|w| cursor_to(w, 10, 5)), "\x1b[5;10H");
    }

    #[test]
    fn cursor_to_clamps_to_one() {
        assert_eq!(emit(|w| cursor_to(w, 0, -3)), "\x1b[1;1H");
    }

    #[test]
    fn cursor_home_sequence() {
        assert_eq!(emit(cursor_home), "\x1b[H");
    }

    #[test]
    fn relative_moves() {
        assert_eq!(emit(|w| cursor_up(w, 3)), "\x1b[3A");
        assert_eq!(emit(|w| cursor_down(w, 2)), "\x1b[2B");
        assert_eq!(emit(|w| cursor_right(w, 7)), "\x1b[7C");
        assert_eq!(emit(|w| cursor_left(w, 1)), "\x1b[1D");
    }

    #[test]
    fn relative_moves_clamp_negative_and_zero() {
        assert_eq!(emit(|w| cursor_up(w, -5)), "\x1b[1A");
        assert_eq!(emit(|w| cursor_left(w, 0)), "\x1b[1D");
    }

    #[test]
    fn save_restore() {
        assert_eq!(emit(save_cursor), "\x1b7");
        assert_eq!(emit(restore_cursor), "\x1b8");
    }

    #[test]
    fn hide_show() {
        assert_eq!(emit(cursor_hide), "\x1b[?25l");
        assert_eq!(emit(cursor_show), "\x1b[?25h");
    }

    #[test]
    fn position_request() {
        assert_eq!(emit(request_position), "\x1b[6n");
    }

    // ── Clearing ────────────────────────────────────────────────

    #[test]
    fn clear_screen_variants() {
        assert_eq!(emit(|w| clear_screen(w, ClearRange::ToEnd)), "\x1b[0J");
        assert_eq!(emit(|w| clear_screen(w, ClearRange::ToStart)), "\x1b[1J");
        assert_eq!(emit(|w| clear_screen(w, ClearRange::All)), "\x1b[2J");
    }

    #[test]
    fn clear_line_variants() {
        assert_eq!(emit(|w| clear_line(w, ClearRange::ToEnd)), "\x1b[0K");
        assert_eq!(emit(|w| clear_line(w, ClearRange::ToStart)), "\x1b[1K");
        assert_eq!(emit(|w| clear_line(w, ClearRange::All)), "\x1b[2K");
    }

    // ── Colors ──────────────────────────────────────────────────

    #[test]
    fn palette_colors() {
        assert_eq!(emit(|w| fg(w, ColorCode::new(196))), "\x1b[38;5;196m");
        assert_eq!(emit(|w| bg(w, ColorCode::BLUE)), "\x1b[48;5;4m");
    }

    #[test]
    fn default_colors() {
        assert_eq!(emit(default_fg), "\x1b[39m");
        assert_eq!(emit(default_bg), "\x1b[49m");
    }

    #[test]
    fn full_reset() {
        assert_eq!(emit(reset), "\x1b[0m\x1b[39m\x1b[49m");
    }

    // ── Attributes ──────────────────────────────────────────────

    #[test]
    fn single_attributes_on() {
        assert_eq!(emit(|w| attrs(w, Attr::BOLD, true)), "\x1b[1m");
        assert_eq!(emit(|w| attrs(w, Attr::UNDERLINE, true)), "\x1b[4m");
        assert_eq!(emit(|w| attrs(w, Attr::BLINK, true)), "\x1b[5m");
        assert_eq!(emit(|w| attrs(w, Attr::REVERSE, true)), "\x1b[7m");
    }

    #[test]
    fn single_attributes_off() {
        assert_eq!(emit(|w| attrs(w, Attr::BOLD, false)), "\x1b[21m");
        assert_eq!(emit(|w| attrs(w, Attr::UNDERLINE, false)), "\x1b[24m");
        assert_eq!(emit(|w| attrs(w, Attr::BLINK, false)), "\x1b[25m");
        assert_eq!(emit(|w| attrs(w, Attr::REVERSE, false)), "\x1b[27m");
    }

    #[test]
    fn combined_attributes() {
        assert_eq!(emit(|w| attrs(w, Attr::BOLD | Attr::REVERSE, true)), "\x1b[1;7m");
    }

    #[test]
    fn empty_attributes_emit_nothing() {
        assert_eq!(emit(|w| attrs(w, Attr::empty(), true)), "");
    }

    // ── Title ───────────────────────────────────────────────────

    #[test]
    fn title() {
        assert_eq!(emit(|w| set_title(w, "rawcon")), "\x1b]0;rawcon\x07");
    }

    #[test]
    fn title_drops_control_characters() {
        assert_eq!(emit(|w| set_title(w, "a\x07b\x1bc")), "\x1b]0;abc\x07");
    }
}
