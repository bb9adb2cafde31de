// SPDX-License-Identifier: MIT
//
// xterm-256 color codes.
//
// The palette has three regions:
//
//   0–15     named colors (black … white), never produced from RGB
//   16–231   6×6×6 color cube
//   232–255  24-step gray ramp
//
// RGB triples are quantized by truncating division, not nearest match:
// gray triples (r == g == b) land on the ramp, everything else in the
// cube. That keeps the mapping cheap and predictable for gradients.

use std::fmt;

/// An xterm-256 palette index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColorCode(u8);

impl ColorCode {
    pub const BLACK: Self = Self(0);
    pub const RED: Self = Self(1);
    pub const GREEN: Self = Self(2);
    pub const BROWN: Self = Self(3);
    pub const BLUE: Self = Self(4);
    pub const MAGENTA: Self = Self(5);
    pub const CYAN: Self = Self(6);
    pub const GRAY: Self = Self(7);
    pub const DARK_GRAY: Self = Self(8);
    pub const BRIGHT_RED: Self = Self(9);
    pub const BRIGHT_GREEN: Self = Self(10);
    pub const YELLOW: Self = Self(11);
    pub const BRIGHT_BLUE: Self = Self(12);
    pub const BRIGHT_MAGENTA: Self = Self(13);
    pub const BRIGHT_CYAN: Self = Self(14);
    pub const WHITE: Self = Self(15);

    /// First index of the 6×6×6 cube.
    pub const CUBE_START: u8 = 16;
    /// First index of the gray ramp.
    pub const GRAY_START: u8 = 232;

    /// A raw palette index.
    #[inline]
    #[must_use]
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    /// Quantize an 8-bit RGB triple.
    ///
    /// ```
    /// use rawcon_term::ColorCode;
    ///
    /// assert_eq!(ColorCode::rgb(0, 0, 0).index(), 232);
    /// assert_eq!(ColorCode::rgb(255, 0, 0).index(), 196);
    /// ```
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        if r == g && g == b {
            // 24 steps over 0..=255.
            Self(Self::GRAY_START + (r as u16 * 24 / 256) as u8)
        } else {
            Self(Self::CUBE_START + 36 * cube_level(r) + 6 * cube_level(g) + cube_level(b))
        }
    }

    /// Quantize unit-range components (clamped to `0.0..=1.0`).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamped to 0..=255 first.
    pub fn from_unit_rgb(r: f64, g: f64, b: f64) -> Self {
        let scale = |c: f64| {
            if c.is_nan() {
                0
            } else {
                (c.clamp(0.0, 1.0) * 255.0) as u8
            }
        };
        Self::rgb(scale(r), scale(g), scale(b))
    }

    /// The palette index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    /// Whether this is one of the 16 named colors.
    #[inline]
    #[must_use]
    pub const fn is_named(self) -> bool {
        self.0 < Self::CUBE_START
    }

    /// Whether this is on the gray ramp.
    #[inline]
    #[must_use]
    pub const fn is_gray(self) -> bool {
        self.0 >= Self::GRAY_START
    }
}

/// Which of the six cube levels an 8-bit component falls in.
#[inline]
const fn cube_level(c: u8) -> u8 {
    (c as u16 * 6 / 256) as u8
}

impl From<u8> for ColorCode {
    fn from(index: u8) -> Self {
        Self(index)
    }
}

impl From<ColorCode> for u8 {
    fn from(code: ColorCode) -> Self {
        code.0
    }
}

impl fmt::Debug for ColorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ansi({})", self.0)
    }
}

impl fmt::Display for ColorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
