// SPDX-License-Identifier: MIT
//
// rawcon-term — terminal control runtime for rawcon.
//
// Puts the controlling terminal into raw mode, emits ANSI/VT control
// sequences, and asks the terminal where its cursor is by writing a
// query and parsing the reply off the input stream. Terminal size is
// derived from that same query. Alongside, a single-threaded event loop
// delivers signals, timers, and descriptor readiness as plain callbacks.
//
// When stdin/stdout are not a capable terminal, everything degrades to
// plain-text passthrough: no escape bytes are written and queries answer
// with zero values instead of touching the device.

#[cfg(not(unix))]
compile_error!("rawcon-term drives termios, poll(2) and sigaction(2); it needs a Unix-like target");

pub mod ansi;
pub mod color;
pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod event_loop;
pub mod input;
pub mod query;
pub mod signal;
pub mod terminal;

#[cfg(test)]
mod mock;

pub use color::ColorCode;
pub use config::Config;
pub use console::{Console, PrintOptions};
pub use error::{Error, ParseError, Result};
pub use event_loop::{CallbackResult, EventLoop, Registry, SourceId, SourceKind};
pub use query::{Position, QueryProtocol, Size};
pub use terminal::{RawTerminal, TerminalMode};
