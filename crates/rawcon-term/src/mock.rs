// SPDX-License-Identifier: MIT
//
// In-memory terminal for tests.
//
// Interprets just enough of the output stream to behave like a real
// terminal for queries: save/restore cursor, absolute and relative moves
// (clamped to the screen, the way real terminals clamp), plain text
// advancing the cursor, and DSR 6 answered with a cursor position report
// queued on the input side. Everything written is also kept verbatim so
// tests can assert on exact bytes.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use crate::query::{Position, Size};

/// How the mock answers a position request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Report the tracked cursor position.
    Track,
    /// Answer with these exact bytes.
    Fixed(Vec<u8>),
    /// Never answer.
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Esc {
    Ground,
    Escape,
    Csi,
}

pub struct MockTerminal {
    size: Size,
    cursor: Position,
    saved: Option<Position>,
    reply: Reply,
    input: VecDeque<u8>,
    written: Vec<u8>,
    requests: usize,
    read_chunk: usize,
    short_writes: bool,
    dirty: bool,
    flushed_before_request: bool,
    esc: Esc,
    params: Vec<u8>,
}

impl MockTerminal {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            size: Size { width, height },
            cursor: Position::new(1, 1),
            saved: None,
            reply: Reply::Track,
            input: VecDeque::new(),
            written: Vec::new(),
            requests: 0,
            read_chunk: usize::MAX,
            short_writes: false,
            dirty: false,
            flushed_before_request: false,
            esc: Esc::Ground,
            params: Vec::new(),
        }
    }

    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.reply = reply;
        self
    }

    /// Deliver input at most `chunk` bytes per `read`.
    pub fn with_read_chunk(mut self, chunk: usize) -> Self {
        self.read_chunk = chunk.max(1);
        self
    }

    /// Accept only half of every multi-byte write.
    pub fn with_short_writes(mut self) -> Self {
        self.short_writes = true;
        self
    }

    pub fn place_cursor(&mut self, pos: Position) {
        self.cursor = self.clamp(i32::from(pos.x), i32::from(pos.y));
    }

    pub const fn cursor(&self) -> Position {
        self.cursor
    }

    pub const fn requests(&self) -> usize {
        self.requests
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    pub fn clear_written(&mut self) {
        self.written.clear();
    }

    /// Whether everything written before the last request was flushed first.
    pub const fn flushed_before_request(&self) -> bool {
        self.flushed_before_request
    }

    fn clamp(&self, x: i32, y: i32) -> Position {
        let clamp_axis = |v: i32, max: u16| {
            u16::try_from(v.clamp(1, i32::from(max.max(1)))).unwrap_or(1)
        };
        Position::new(clamp_axis(x, self.size.width), clamp_axis(y, self.size.height))
    }

    fn feed(&mut self, byte: u8, was_dirty: bool) {
        match (self.esc, byte) {
            (Esc::Ground, 0x1b) => self.esc = Esc::Escape,
            (Esc::Ground, b'\n') => {
                let y = i32::from(self.cursor.y) + 1;
                self.cursor = self.clamp(1, y);
            }
            (Esc::Ground, b'\r') => self.cursor.x = 1,
            // UTF-8 continuation bytes don't advance.
            (Esc::Ground, 0x80..=0xbf) => {}
            (Esc::Ground, _) => {
                let x = i32::from(self.cursor.x) + 1;
                self.cursor = self.clamp(x, i32::from(self.cursor.y));
            }

            (Esc::Escape, b'[') => {
                self.params.clear();
                self.esc = Esc::Csi;
            }
            (Esc::Escape, b'7') => {
                self.saved = Some(self.cursor);
                self.esc = Esc::Ground;
            }
            (Esc::Escape, b'8') => {
                if let Some(saved) = self.saved {
                    self.cursor = saved;
                }
                self.esc = Esc::Ground;
            }
            (Esc::Escape, _) => self.esc = Esc::Ground,

            (Esc::Csi, 0x40..=0x7e) => {
                self.esc = Esc::Ground;
                self.csi(byte, was_dirty);
            }
            (Esc::Csi, _) => self.params.push(byte),
        }
    }

    fn csi(&mut self, final_byte: u8, was_dirty: bool) {
        let params = String::from_utf8_lossy(&self.params).into_owned();
        let nums: Vec<i32> = params
            .split(';')
            .map(|p| p.parse().unwrap_or(1))
            .collect();
        let first = nums.first().copied().unwrap_or(1);
        let (x, y) = (i32::from(self.cursor.x), i32::from(self.cursor.y));

        match final_byte {
            b'H' => {
                let row = first;
                let col = nums.get(1).copied().unwrap_or(1);
                self.cursor = self.clamp(col, row);
            }
            b'A' => self.cursor = self.clamp(x, y - first),
            b'B' => self.cursor = self.clamp(x, y + first),
            b'C' => self.cursor = self.clamp(x + first, y),
            b'D' => self.cursor = self.clamp(x - first, y),
            b'n' if params == "6" => {
                self.requests += 1;
                self.flushed_before_request = !was_dirty;
                match &self.reply {
                    Reply::Track => {
                        let report = format!("\x1b[{};{}R", self.cursor.y, self.cursor.x);
                        self.input.extend(report.as_bytes());
                    }
                    Reply::Fixed(bytes) => self.input.extend(bytes.iter().copied()),
                    Reply::Silent => {}
                }
            }
            _ => {}
        }
    }
}

impl Write for MockTerminal {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let accepted = if self.short_writes && buf.len() > 1 {
            buf.len() / 2
        } else {
            buf.len()
        };

        let was_dirty = self.dirty;
        for &byte in &buf[..accepted] {
            self.feed(byte, was_dirty);
        }
        self.written.extend_from_slice(&buf[..accepted]);
        self.dirty = true;
        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dirty = false;
        Ok(())
    }
}

impl Read for MockTerminal {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.read_chunk).min(self.input.len());
        for slot in &mut buf[..n] {
            if let Some(byte) = self.input.pop_front() {
                *slot = byte;
            }
        }
        Ok(n)
    }
}
