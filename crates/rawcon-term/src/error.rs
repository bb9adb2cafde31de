// SPDX-License-Identifier: MIT
//
// Error types for terminal control, queries, and event registration.
//
// Capability failures never reach simple callers: the console absorbs
// them and degrades to passthrough. Everything else is a distinguishable
// reason, so a caller can tell "no terminal" from "terminal answered
// garbage".

use std::io;

use thiserror::Error;

/// Terminal runtime error.
#[derive(Error, Debug)]
pub enum Error {
    /// stdin/stdout are not a capable terminal.
    #[error("not a capable terminal")]
    NotATty,

    /// Reading from or writing to the terminal descriptor failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The query was sent but nothing came back before the read timeout.
    #[error("terminal sent no reply before the read timeout")]
    NoReply,

    /// The reply did not match `ESC [ row ; col R`.
    #[error("malformed terminal reply: {0}")]
    Parse(#[from] ParseError),

    /// An event source could not be registered or cancelled.
    #[error("invalid event registration: {0}")]
    Registration(String),

    /// A query was started while another one was still waiting for its reply.
    #[error("a terminal query is already in flight")]
    QueryInFlight,
}

/// Why a cursor-position reply was rejected.
///
/// Each variant names the grammar step that failed. The byte offsets are
/// positions within the reply as read from the device.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The reply did not start with ESC.
    #[error("expected ESC at offset 0, found {0:#04x}")]
    ExpectedEscape(u8),

    /// ESC was not followed by `[`.
    #[error("expected '[' at offset 1, found {0:#04x}")]
    ExpectedBracket(u8),

    /// No digits before the `;`.
    #[error("row number is empty")]
    EmptyRow,

    /// No digits between `;` and `R`.
    #[error("column number is empty")]
    EmptyColumn,

    /// A byte that fits no grammar step.
    #[error("unexpected byte {byte:#04x} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },

    /// The reply ended before the final `R`.
    #[error("reply ended without the 'R' terminator")]
    MissingTerminator,

    /// Bytes followed the final `R`.
    #[error("{0} trailing byte(s) after the 'R' terminator")]
    TrailingBytes(usize),

    /// A coordinate does not fit in 16 bits.
    #[error("coordinate out of range")]
    Overflow,

    /// The terminal reported row or column 0; positions are 1-based.
    #[error("coordinate 0 in a 1-based reply")]
    ZeroCoordinate,
}

/// Result type for terminal operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_converts_into_error() {
        let err: Error = ParseError::MissingTerminator.into();
        assert!(matches!(err, Error::Parse(ParseError::MissingTerminator)));
    }

    #[test]
    fn io_error_converts_into_error() {
        let err: Error = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn display_names_the_offending_byte() {
        let err = ParseError::UnexpectedByte { byte: b'x', offset: 4 };
        assert_eq!(err.to_string(), "unexpected byte 0x78 at offset 4");
    }

    #[test]
    fn display_wraps_parse_reason() {
        let err = Error::Parse(ParseError::EmptyRow);
        assert_eq!(err.to_string(), "malformed terminal reply: row number is empty");
    }
}
