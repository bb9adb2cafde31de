// SPDX-License-Identifier: MIT
//
// Runtime configuration.
//
// Defaults match what an interactive terminal needs: a 500ms ceiling on
// every blocking read, a reply buffer comfortably larger than the longest
// cursor report, and "dumb" on the list of terminals that cannot take
// escape sequences. `from_env` layers a couple of environment overrides on
// top; anything unparsable is logged and ignored.

use std::env;
use std::time::Duration;

/// Smallest reply buffer accepted. `ESC[65535;65535R` is 15 bytes.
pub const MIN_REPLY_CAPACITY: usize = 16;

/// Environment variable overriding [`Config::read_timeout`] (milliseconds).
pub const ENV_READ_TIMEOUT: &str = "RAWCON_READ_TIMEOUT_MS";

/// Environment variable appending to [`Config::incapable_terms`]
/// (comma-separated `TERM` values).
pub const ENV_INCAPABLE_TERMS: &str = "RAWCON_INCAPABLE_TERMS";

/// Terminal runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Upper bound on any single blocking read from the terminal.
    pub read_timeout: Duration,
    /// termios `VMIN`: bytes a raw read waits for before returning.
    pub min_read_bytes: u8,
    /// Size of the buffer a query reply is read into.
    pub reply_capacity: usize,
    /// Out-of-range coordinate used to find the bottom-right corner.
    pub size_probe: u16,
    /// `TERM` values that cannot interpret escape sequences.
    pub incapable_terms: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(500),
            min_read_bytes: 0,
            reply_capacity: 32,
            size_probe: 9999,
            incapable_terms: vec!["dumb".to_owned()],
        }
    }
}

impl Config {
    /// Defaults plus environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = env::var(ENV_READ_TIMEOUT) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.read_timeout = Duration::from_millis(ms),
                _ => log::warn!("ignoring {ENV_READ_TIMEOUT}={raw:?}: expected milliseconds > 0"),
            }
        }

        if let Ok(raw) = env::var(ENV_INCAPABLE_TERMS) {
            config.incapable_terms.extend(
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned),
            );
        }

        config
    }

    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Reply buffer size, raised to [`MIN_REPLY_CAPACITY`] if smaller.
    #[must_use]
    pub fn with_reply_capacity(mut self, capacity: usize) -> Self {
        self.reply_capacity = capacity.max(MIN_REPLY_CAPACITY);
        self
    }

    #[must_use]
    pub const fn with_size_probe(mut self, probe: u16) -> Self {
        self.size_probe = probe;
        self
    }

    #[must_use]
    pub fn with_incapable_term(mut self, term: impl Into<String>) -> Self {
        self.incapable_terms.push(term.into());
        self
    }

    /// The read timeout in termios `VTIME` units (deciseconds), rounded
    /// up and clamped to `1..=255`.
    #[must_use]
    pub fn vtime(&self) -> u8 {
        let ds = self.read_timeout.as_millis().div_ceil(100);
        u8::try_from(ds.clamp(1, 255)).unwrap_or(u8::MAX)
    }

    /// Whether `TERM` names a terminal that takes escape sequences.
    ///
    /// An unset `TERM` counts as incapable.
    #[must_use]
    pub fn term_is_capable(&self, term: Option<&str>) -> bool {
        term.is_some_and(|t| !self.incapable_terms.iter().any(|bad| bad == t))
    }
}
