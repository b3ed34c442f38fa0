//! Fixed canvas palette.
//!
//! The canvas speaks in single-character color codes; everything else
//! (snapshots, task files, the overlay) speaks RGB. This module owns the
//! bidirectional mapping between the two. The mapping is a total bijection
//! over a fixed 19-entry alphabet: no two codes share an RGB value and no
//! two RGB values share a code.
//!
//! RGB values outside the alphabet never enter the engine: task-file input
//! must already be quantized to palette members (the nearest-color
//! quantizer is an external tool), and anything else is rejected at the
//! boundary with a typed error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An RGB triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parse a `#rrggbb` hex string.
    ///
    /// # Errors
    ///
    /// Returns [`PaletteError::MalformedHex`] if the string is not exactly
    /// `#` followed by six hex digits.
    pub fn from_hex(hex: &str) -> Result<Self, PaletteError> {
        let digits = hex
            .strip_prefix('#')
            .filter(|d| d.len() == 6)
            .ok_or_else(|| PaletteError::MalformedHex(hex.to_string()))?;

        let parse = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| PaletteError::MalformedHex(hex.to_string()))
        };

        Ok(Self(parse(0..2)?, parse(2..4)?, parse(4..6)?))
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

/// A single-character palette color code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub struct ColorCode(u8);

impl ColorCode {
    /// Validate a character as a palette code.
    ///
    /// # Errors
    ///
    /// Returns [`PaletteError::UnknownCode`] if the character is not part
    /// of the palette alphabet.
    pub fn from_char(c: char) -> Result<Self, PaletteError> {
        let code = Self(u8::try_from(c).map_err(|_| PaletteError::UnknownCode(c))?);
        if rgb(code).is_some() {
            Ok(code)
        } else {
            Err(PaletteError::UnknownCode(c))
        }
    }

    /// The code as a `char`.
    #[must_use]
    pub const fn as_char(self) -> char {
        self.0 as char
    }

    /// Const-context validation of an ASCII byte as a palette code.
    ///
    /// Lets fixed colors (the clock overlay's) be checked at compile time.
    #[must_use]
    pub const fn from_ascii(byte: u8) -> Option<Self> {
        let mut i = 0;
        while i < ENTRIES.len() {
            if ENTRIES[i].0 == byte {
                return Some(Self(byte));
            }
            i += 1;
        }
        None
    }
}

impl TryFrom<char> for ColorCode {
    type Error = PaletteError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        Self::from_char(c)
    }
}

impl From<ColorCode> for char {
    fn from(code: ColorCode) -> Self {
        code.as_char()
    }
}

impl std::fmt::Display for ColorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Palette errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaletteError {
    /// The character is not a palette code.
    #[error("unknown palette code: {0:?}")]
    UnknownCode(char),

    /// The RGB value is not a palette member.
    #[error("color {0} is not in the palette (quantize task input first)")]
    UnknownColor(Rgb),

    /// Not a `#rrggbb` string.
    #[error("malformed hex color: {0:?}")]
    MalformedHex(String),
}

/// The palette alphabet: `(code, rgb)` pairs.
///
/// Order is irrelevant; lookups are linear scans over 19 entries, which is
/// cheaper than hashing at this size and keeps the table `const`.
const ENTRIES: [(u8, Rgb); 19] = [
    (b'0', Rgb(0x00, 0x00, 0x00)),
    (b'1', Rgb(0xff, 0xff, 0xff)),
    (b'2', Rgb(0xfc, 0xde, 0x6b)),
    (b'3', Rgb(0xff, 0xf6, 0xd1)),
    (b'4', Rgb(0x7d, 0x95, 0x91)),
    (b'5', Rgb(0x71, 0xbe, 0xd6)),
    (b'6', Rgb(0x3b, 0xe5, 0xdb)),
    (b'7', Rgb(0xfe, 0xd3, 0xc7)),
    (b'8', Rgb(0xb8, 0x3f, 0x27)),
    (b'9', Rgb(0xfa, 0xac, 0x8e)),
    (b'A', Rgb(0x00, 0x46, 0x70)),
    (b'B', Rgb(0x05, 0x71, 0x97)),
    (b'C', Rgb(0x44, 0xc9, 0x5f)),
    (b'D', Rgb(0x77, 0x54, 0xff)),
    (b'E', Rgb(0xff, 0x00, 0x00)),
    (b'F', Rgb(0xff, 0x98, 0x00)),
    (b'G', Rgb(0x97, 0xfd, 0xdc)),
    (b'H', Rgb(0xf8, 0xcb, 0x8c)),
    (b'I', Rgb(0x2e, 0x8f, 0xaf)),
];

/// Number of palette entries.
pub const PALETTE_SIZE: usize = ENTRIES.len();

/// All palette codes, in table order.
pub fn codes() -> impl Iterator<Item = ColorCode> {
    ENTRIES.iter().map(|&(c, _)| ColorCode(c))
}

/// Look up the RGB value for a code.
#[must_use]
pub fn rgb(code: ColorCode) -> Option<Rgb> {
    ENTRIES
        .iter()
        .find(|&&(c, _)| c == code.0)
        .map(|&(_, rgb)| rgb)
}

/// Look up the code for an RGB value.
#[must_use]
pub fn code(rgb: Rgb) -> Option<ColorCode> {
    ENTRIES
        .iter()
        .find(|&&(_, entry)| entry == rgb)
        .map(|&(c, _)| ColorCode(c))
}

/// Resolve task-file color input: either a bare palette code (`"E"`) or a
/// hex string (`"#ff0000"`) that must be an exact palette member.
///
/// # Errors
///
/// Returns a [`PaletteError`] for malformed input, unknown codes, or hex
/// colors outside the palette.
pub fn resolve_color_input(input: &str) -> Result<ColorCode, PaletteError> {
    if input.starts_with('#') {
        let rgb_value = Rgb::from_hex(input)?;
        code(rgb_value).ok_or(PaletteError::UnknownColor(rgb_value))
    } else {
        let mut chars = input.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => ColorCode::from_char(c),
            _ => Err(PaletteError::MalformedHex(input.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_bijection() {
        for c in codes() {
            let rgb_value = rgb(c).expect("every code has an RGB value");
            assert_eq!(code(rgb_value), Some(c), "code {c} must round-trip");
        }
    }

    #[test]
    fn no_duplicate_rgb_values() {
        let mut seen = std::collections::HashSet::new();
        for c in codes() {
            assert!(seen.insert(rgb(c).unwrap()), "duplicate RGB for {c}");
        }
        assert_eq!(seen.len(), PALETTE_SIZE);
    }

    #[test]
    fn rejects_unknown_code() {
        assert_eq!(
            ColorCode::from_char('Z'),
            Err(PaletteError::UnknownCode('Z'))
        );
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(Rgb::from_hex("#ff9800"), Ok(Rgb(0xff, 0x98, 0x00)));
        assert!(Rgb::from_hex("ff9800").is_err());
        assert!(Rgb::from_hex("#ff98").is_err());
        assert!(Rgb::from_hex("#gg9800").is_err());
    }

    #[test]
    fn resolve_color_input_accepts_codes_and_exact_hex() {
        assert_eq!(
            resolve_color_input("E").unwrap(),
            ColorCode::from_char('E').unwrap()
        );
        assert_eq!(
            resolve_color_input("#ff0000").unwrap(),
            ColorCode::from_char('E').unwrap()
        );
        // In the palette only after quantization, so rejected here.
        assert_eq!(
            resolve_color_input("#ff0001"),
            Err(PaletteError::UnknownColor(Rgb(0xff, 0x00, 0x01)))
        );
    }
}
