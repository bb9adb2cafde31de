// SPDX-License-Identifier: MIT
//
// Cursor position queries — the terminal request/response protocol.
//
// No OS call tells us where the cursor is. Instead we write DSR 6
// (`ESC [ 6 n`) and the terminal answers on our input stream with a
// cursor position report:
//
//   ESC [ <row> ; <col> R
//
// The exchange is strictly one-at-a-time: the terminal link is a single
// unframed byte stream, so a second request before the first reply has
// been consumed would make the replies ambiguous. `QueryProtocol` tracks
// the in-flight request and refuses to overlap.
//
// Replies are parsed by a small state machine that names every failure.
// A reply that does not fit the grammar is an error, never a guess: a
// silently wrong position is worse than no position.
//
// Terminal size is derived from the same query. Save the cursor, move it
// to an absurd coordinate so the terminal clamps it into the bottom-right
// cell, ask where it ended up, restore. Every terminal we care about
// clamps CUP like this; it is still an assumption, not a guarantee.

use std::collections::VecDeque;
use std::fmt;
use std::io::{Read, Write};
use std::time::Instant;

use crate::ansi;
use crate::config::Config;
use crate::error::{Error, ParseError, Result};

// ─── Position & Size ─────────────────────────────────────────────────────────

/// A 1-based cursor position: column `x`, row `y`.
///
/// `(0, 0)` appears only as the fallback returned when no terminal is
/// available or a query failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    /// Column, starting at 1.
    pub x: u16,
    /// Row, starting at 1.
    pub y: u16,
}

impl Position {
    /// The fallback "unknown" position.
    pub const ZERO: Self = Self { x: 0, y: 0 };

    #[inline]
    #[must_use]
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

impl From<(u16, u16)> for Position {
    fn from((x, y): (u16, u16)) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u16,
    pub height: u16,
}

impl Size {
    /// The fallback "unknown" size.
    pub const ZERO: Self = Self {
        width: 0,
        height: 0,
    };

    /// Total number of cells (`width × height`).
    #[inline]
    #[must_use]
    pub const fn area(self) -> u32 {
        self.width as u32 * self.height as u32
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ─── Reply Parser ────────────────────────────────────────────────────────────

/// Where the parser is in `ESC [ row ; col R`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Escape,
    Bracket,
    Row,
    Column,
    Done,
}

/// Outcome of feeding one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More bytes are needed.
    Pending,
    /// The terminating `R` arrived.
    Complete(Position),
}

/// Incremental parser for cursor position reports.
///
/// Feed bytes as they arrive with [`advance`](Self::advance). Any byte
/// that breaks the grammar fails immediately with the step that broke.
#[derive(Debug, Clone)]
pub struct ReplyParser {
    state: State,
    offset: usize,
    row: Option<u16>,
    col: Option<u16>,
}

impl ReplyParser {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: State::Escape,
            offset: 0,
            row: None,
            col: None,
        }
    }

    /// Feed one byte.
    ///
    /// # Errors
    ///
    /// Returns the [`ParseError`] for the first byte that does not fit,
    /// or for any byte after the reply already completed.
    pub fn advance(&mut self, byte: u8) -> std::result::Result<Progress, ParseError> {
        let offset = self.offset;
        self.offset += 1;

        match (self.state, byte) {
            (State::Escape, 0x1b) => self.state = State::Bracket,
            (State::Escape, b) => return Err(ParseError::ExpectedEscape(b)),

            (State::Bracket, b'[') => self.state = State::Row,
            (State::Bracket, b) => return Err(ParseError::ExpectedBracket(b)),

            (State::Row, b'0'..=b'9') => self.row = Some(push_digit(self.row, byte)?),
            (State::Row, b';') => {
                if self.row.is_none() {
                    return Err(ParseError::EmptyRow);
                }
                self.state = State::Column;
            }

            (State::Column, b'0'..=b'9') => self.col = Some(push_digit(self.col, byte)?),
            (State::Column, b'R') => {
                let (Some(y), Some(x)) = (self.row, self.col) else {
                    return Err(ParseError::EmptyColumn);
                };
                if x == 0 || y == 0 {
                    return Err(ParseError::ZeroCoordinate);
                }
                self.state = State::Done;
                return Ok(Progress::Complete(Position { x, y }));
            }

            (State::Done, _) => return Err(ParseError::TrailingBytes(1)),
            (_, b) => return Err(ParseError::UnexpectedByte { byte: b, offset }),
        }

        Ok(Progress::Pending)
    }

    /// Whether the parser has seen the final `R`.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == State::Done
    }
}

impl Default for ReplyParser {
    fn default() -> Self {
        Self::new()
    }
}

fn push_digit(acc: Option<u16>, digit: u8) -> std::result::Result<u16, ParseError> {
    acc.unwrap_or(0)
        .checked_mul(10)
        .and_then(|v| v.checked_add(u16::from(digit - b'0')))
        .ok_or(ParseError::Overflow)
}

/// Parse one complete reply.
///
/// # Errors
///
/// Any grammar violation, including a reply cut short before `R`
/// ([`ParseError::MissingTerminator`]) or bytes after it
/// ([`ParseError::TrailingBytes`]).
pub fn parse_position_reply(reply: &[u8]) -> std::result::Result<Position, ParseError> {
    let mut parser = ReplyParser::new();
    for (i, &byte) in reply.iter().enumerate() {
        if let Progress::Complete(pos) = parser.advance(byte)? {
            let rest = reply.len() - i - 1;
            if rest > 0 {
                return Err(ParseError::TrailingBytes(rest));
            }
            return Ok(pos);
        }
    }
    Err(ParseError::MissingTerminator)
}

// ─── Query Protocol ──────────────────────────────────────────────────────────

/// Request/response state for the terminal link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Idle,
    InFlight { sent_at: Instant },
}

/// Synchronous cursor-position and size queries over a terminal device.
///
/// Not reentrant. Only one query may be in flight; starting another
/// before the first completes fails with [`Error::QueryInFlight`].
///
/// Input that arrives in the same read as a reply, after its `R`, is
/// typed input rather than part of the reply. It is held back and handed
/// out by [`read_unread`](Self::read_unread).
#[derive(Debug)]
pub struct QueryProtocol {
    pending: Pending,
    reply_capacity: usize,
    size_probe: u16,
    unread: VecDeque<u8>,
}

impl QueryProtocol {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            pending: Pending::Idle,
            reply_capacity: config.reply_capacity.max(crate::config::MIN_REPLY_CAPACITY),
            size_probe: config.size_probe,
            unread: VecDeque::new(),
        }
    }

    /// Whether a request has been sent and its reply not yet consumed.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> bool {
        matches!(self.pending, Pending::InFlight { .. })
    }

    /// Flush pending output, then write the position request.
    ///
    /// The request must go out in one piece: a partial write would leave
    /// the terminal holding half an escape sequence.
    ///
    /// # Errors
    ///
    /// [`Error::QueryInFlight`] if a request is already outstanding;
    /// [`Error::Io`] if flushing or writing fails or the write was short.
    pub fn send_request(&mut self, device: &mut impl Write) -> Result<()> {
        if self.in_flight() {
            return Err(Error::QueryInFlight);
        }

        device.flush()?;
        let written = device.write(ansi::REQUEST_POSITION)?;
        if written != ansi::REQUEST_POSITION.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!(
                    "short write of position request: {written} of {} bytes",
                    ansi::REQUEST_POSITION.len()
                ),
            )));
        }

        self.pending = Pending::InFlight {
            sent_at: Instant::now(),
        };
        Ok(())
    }

    /// Read and parse the reply to an outstanding request.
    ///
    /// Reads until the reply's `R` arrives, the device reports nothing more
    /// (its read timeout), or the reply buffer fills. The request is no
    /// longer in flight afterwards, whatever the outcome.
    ///
    /// # Errors
    ///
    /// [`Error::NoReply`] if nothing at all was read, [`Error::Parse`] for a
    /// malformed or truncated reply, [`Error::Io`] if the read failed.
    pub fn receive_reply(&mut self, device: &mut impl Read) -> Result<Position> {
        let sent_at = match self.pending {
            Pending::InFlight { sent_at } => sent_at,
            // Nothing asked, nothing to read.
            Pending::Idle => return Err(Error::NoReply),
        };
        self.pending = Pending::Idle;

        let mut buf = vec![0u8; self.reply_capacity];
        let mut len = 0;
        let mut parser = ReplyParser::new();

        while len < buf.len() {
            let n = device.read(&mut buf[len..])?;
            if n == 0 {
                break;
            }
            for (i, &byte) in buf[len..len + n].iter().enumerate() {
                if let Progress::Complete(pos) = parser.advance(byte)? {
                    let rest = &buf[len + i + 1..len + n];
                    if !rest.is_empty() {
                        log::debug!("holding {} input byte(s) read after the reply", rest.len());
                        self.unread.extend(rest);
                    }
                    log::debug!(
                        "cursor position {pos} after {:?}",
                        sent_at.elapsed()
                    );
                    return Ok(pos);
                }
            }
            len += n;
        }

        if len == 0 {
            log::debug!("no reply to position request after {:?}", sent_at.elapsed());
            return Err(Error::NoReply);
        }
        Err(ParseError::MissingTerminator.into())
    }

    /// Whether input read along with a reply is still waiting.
    #[inline]
    #[must_use]
    pub fn has_unread(&self) -> bool {
        !self.unread.is_empty()
    }

    /// Move held-back input into `buf`, oldest first. Returns the number
    /// of bytes moved.
    pub fn read_unread(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.unread.len());
        for (slot, byte) in buf.iter_mut().zip(self.unread.drain(..n)) {
            *slot = byte;
        }
        n
    }

    /// Query the cursor position: request, then reply.
    ///
    /// # Errors
    ///
    /// See [`send_request`](Self::send_request) and
    /// [`receive_reply`](Self::receive_reply).
    pub fn cursor_position<D: Read + Write>(&mut self, device: &mut D) -> Result<Position> {
        self.send_request(device)?;
        self.receive_reply(device)
    }

    /// Derive the terminal size from a clamped cursor move.
    ///
    /// The saved cursor is restored whether or not the query succeeds.
    ///
    /// # Errors
    ///
    /// Same as [`cursor_position`](Self::cursor_position), plus I/O
    /// errors from the surrounding cursor moves.
    pub fn size<D: Read + Write>(&mut self, device: &mut D) -> Result<Size> {
        if self.in_flight() {
            return Err(Error::QueryInFlight);
        }

        let probe = i32::from(self.size_probe);
        let mut moves = Vec::with_capacity(16);
        ansi::save_cursor(&mut moves)?;
        ansi::cursor_to(&mut moves, probe, probe)?;
        device.write_all(&moves)?;

        let corner = self.cursor_position(device);

        let mut restore = Vec::with_capacity(2);
        ansi::restore_cursor(&mut restore)?;
        device.write_all(&restore)?;
        device.flush()?;

        let corner = corner?;
        Ok(Size {
            width: corner.x,
            height: corner.y,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
