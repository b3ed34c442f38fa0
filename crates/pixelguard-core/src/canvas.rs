//! The observed canvas bitmap.
//!
//! A fixed `width x height` grid of palette codes, row-major. The canvas is
//! pure data; synchronization (the single coarse lock, the resync signal)
//! lives in the daemon's store wrapper so this type stays trivially
//! testable.

use thiserror::Error;

use crate::palette::{self, ColorCode};

/// Canvas errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CanvasError {
    /// Coordinate outside `[0, width) x [0, height)`.
    #[error("coordinate ({x}, {y}) out of bounds for {width}x{height} canvas")]
    OutOfBounds { x: u32, y: u32, width: u32, height: u32 },

    /// Snapshot string length does not match `width * height`.
    #[error("snapshot length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Snapshot contains a character outside the palette alphabet.
    #[error("snapshot contains non-palette code {code:?} at index {index}")]
    BadSnapshotCode { code: char, index: usize },
}

/// A decoded pixel update from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelUpdate {
    pub x: u32,
    pub y: u32,
    pub color: ColorCode,
}

/// The observed bitmap.
#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    cells: Vec<ColorCode>,
}

impl Canvas {
    /// Allocate a canvas filled with the given code.
    #[must_use]
    pub fn new(width: u32, height: u32, fill: ColorCode) -> Self {
        Self {
            width,
            height,
            cells: vec![fill; width as usize * height as usize],
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Whether a coordinate lies inside the canvas.
    #[must_use]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    fn index(&self, x: u32, y: u32) -> Result<usize, CanvasError> {
        if self.contains(x, y) {
            Ok(y as usize * self.width as usize + x as usize)
        } else {
            Err(CanvasError::OutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            })
        }
    }

    /// Read one pixel.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::OutOfBounds`] for coordinates outside the
    /// canvas.
    pub fn get(&self, x: u32, y: u32) -> Result<ColorCode, CanvasError> {
        Ok(self.cells[self.index(x, y)?])
    }

    /// Write one pixel.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::OutOfBounds`] for coordinates outside the
    /// canvas.
    pub fn set(&mut self, x: u32, y: u32, color: ColorCode) -> Result<(), CanvasError> {
        let index = self.index(x, y)?;
        self.cells[index] = color;
        Ok(())
    }

    /// Replace the whole bitmap from a row-major code string.
    ///
    /// Validation happens before any cell is written, so a failed replace
    /// leaves the canvas untouched: partial replacement is never
    /// observable.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::LengthMismatch`] or
    /// [`CanvasError::BadSnapshotCode`] without modifying the canvas.
    pub fn replace_from_codes(&mut self, codes: &str) -> Result<(), CanvasError> {
        let expected = self.cells.len();
        if codes.len() != expected {
            return Err(CanvasError::LengthMismatch {
                expected,
                actual: codes.len(),
            });
        }

        let mut cells = Vec::with_capacity(expected);
        for (index, c) in codes.chars().enumerate() {
            let code = ColorCode::from_char(c)
                .map_err(|_| CanvasError::BadSnapshotCode { code: c, index })?;
            cells.push(code);
        }

        self.cells = cells;
        Ok(())
    }

    /// Snapshot as a row-major code string.
    #[must_use]
    pub fn to_code_string(&self) -> String {
        self.cells.iter().map(|c| c.as_char()).collect()
    }

    /// Snapshot as row-major RGB bytes (3 bytes per pixel).
    #[must_use]
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.cells.len() * 3);
        for &code in &self.cells {
            // Every stored cell came through palette validation.
            let rgb = palette::rgb(code).unwrap_or(crate::palette::Rgb(0, 0, 0));
            bytes.extend_from_slice(&[rgb.0, rgb.1, rgb.2]);
        }
        bytes
    }
}
