//! Per-call decoding options.

use crate::error::{Error, Result};

/// Upper bounds a header must satisfy before any pixel memory is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest accepted width in pixels
    pub max_width: u32,
    /// Largest accepted height in pixels
    pub max_height: u32,
    /// Largest accepted size of a single pixel buffer, in bytes
    pub max_alloc: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_width: 1 << 24,
            max_height: 1 << 24,
            max_alloc: 1 << 32,
        }
    }
}

impl Limits {
    /// Accepts any dimensions whose buffer size fits in memory arithmetic.
    pub fn unlimited() -> Self {
        Self {
            max_width: u32::MAX,
            max_height: u32::MAX,
            max_alloc: u64::MAX,
        }
    }

    /// Validates `width x height` at `bytes_per_pixel` and returns the buffer
    /// length in bytes.
    pub fn check(&self, width: u32, height: u32, bytes_per_pixel: usize) -> Result<usize> {
        let overflow = Error::DimensionOverflow { width, height };

        if width > self.max_width || height > self.max_height {
            return Err(overflow);
        }

        let len = (width as u64)
            .checked_mul(height as u64)
            .and_then(|pixels| pixels.checked_mul(bytes_per_pixel as u64))
            .ok_or(overflow)?;

        if len > self.max_alloc {
            return Err(overflow);
        }

        usize::try_from(len).map_err(|_| overflow)
    }
}

/// Options for a single decode call.
///
/// ```
/// use rust_image_decoder::DecodeOptions;
///
/// let options = DecodeOptions::new().channels(4).flip_vertically(true);
/// assert_eq!(options.channels, 4);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Requested channel count. 0 keeps the image's native count.
    pub channels: u8,
    /// Keep 16-bit samples instead of reducing them to 8 bits
    pub keep_16bit: bool,
    /// Store the bottom row first
    pub flip_vertically: bool,
    /// Header sanity bounds
    pub limits: Limits,
}

impl DecodeOptions {
    /// Native channel count, 8-bit output, default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the requested channel count (0 = native, 1..=4).
    pub fn channels(mut self, channels: u8) -> Self {
        self.channels = channels;
        self
    }

    /// Keeps 16-bit sources at 16 bits per sample.
    pub fn keep_16bit(mut self, keep: bool) -> Self {
        self.keep_16bit = keep;
        self
    }

    /// Flips the output so the bottom row comes first.
    pub fn flip_vertically(mut self, flip: bool) -> Self {
        self.flip_vertically = flip;
        self
    }

    /// Replaces the header limits.
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}
