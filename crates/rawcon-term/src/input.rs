// SPDX-License-Identifier: MIT
//
// Single-character keyboard input.
//
// One key press is read as one Unicode scalar value: the lead byte says how
// many continuation bytes follow, and we read exactly that many. Escape
// sequences (arrow keys and friends) are not interpreted; their bytes come
// through one character at a time, starting with ESC.

use std::io::{self, Read};

/// Number of bytes in a UTF-8 sequence, from its lead byte.
///
/// Stray continuation bytes and invalid leads count as 1 so the caller
/// always makes progress.
#[inline]
#[must_use]
pub const fn utf8_char_len(lead: u8) -> usize {
    match lead {
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 1,
    }
}

/// Read one character.
///
/// Returns `Ok(None)` if nothing arrived before the reader's timeout.
/// A sequence cut short or not valid UTF-8 decodes to U+FFFD.
///
/// # Errors
///
/// Propagates read errors from `reader`.
pub fn read_char(reader: &mut impl Read) -> io::Result<Option<char>> {
    let mut buf = [0u8; 4];
    if reader.read(&mut buf[..1])? == 0 {
        return Ok(None);
    }

    let len = utf8_char_len(buf[0]);
    let mut have = 1;
    while have < len {
        let n = reader.read(&mut buf[have..len])?;
        if n == 0 {
            break;
        }
        have += n;
    }

    let ch = std::str::from_utf8(&buf[..have])
        .ok()
        .and_then(|s| s.chars().next())
        .unwrap_or(char::REPLACEMENT_CHARACTER);
    Ok(Some(ch))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
