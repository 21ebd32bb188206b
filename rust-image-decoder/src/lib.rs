#![warn(missing_docs)]

//! Decodes PNG, JPEG, GIF, BMP, PNM, TGA and PSD images held in memory into one
//! owned, row-major pixel buffer with the channel count the caller asks for.
//!
//! ```
//! // 1x1 binary PPM holding a single red pixel
//! let image = rust_image_decoder::decode(b"P6 1 1 255\n\xFF\x00\x00", 4).unwrap();
//! assert_eq!(image.pixels, [255, 0, 0, 255]);
//! ```
mod bitstream;
mod bmp;
mod bytes;
mod checksum;
mod decoder;
mod error;
mod gif;
/// Defines types for decoding images
pub mod image;
mod inflate;
mod jpeg;
mod normalize;
mod options;
mod png;
mod pnm;
mod psd;
mod sniff;
mod tga;

use log::debug;

pub use decoder::{Decoder, DecoderState};
pub use error::{Error, Result};
pub use image::{ColorLayout, Image, ImageHeader, Palette};
pub use options::{DecodeOptions, Limits};
pub use sniff::ImageFormat;

/// Decodes `data` into an image with `channels` channels per pixel (0 keeps
/// the image's own count). 16-bit sources are reduced to 8 bits.
pub fn decode(data: &[u8], channels: u8) -> Result<Image> {
    decode_with_options(data, &DecodeOptions::new().channels(channels))
}

/// Decodes `data` according to `options`.
///
/// Either the whole image is returned or an error; partially decoded pixels
/// are never handed out.
pub fn decode_with_options(data: &[u8], options: &DecodeOptions) -> Result<Image> {
    let decoder = Decoder::new(data, options.limits)?;
    let format = decoder.format();
    let image = decoder.decode(options)?;
    debug!(
        "decoded {:?}: {}x{}, {} channels, {}-bit",
        format, image.width, image.height, image.channels, image.bit_depth
    );
    Ok(image)
}

/// Image properties reported by [`probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    /// Detected format
    pub format: ImageFormat,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Channels a decode with `channels == 0` produces
    pub channels: u8,
    /// Bits per native sample, 8 or 16
    pub bit_depth: u8,
}

/// Reads only the header of `data`.
pub fn probe(data: &[u8]) -> Result<ImageInfo> {
    let mut decoder = Decoder::new(data, Limits::default())?;
    let format = decoder.format();
    let header = decoder.read_header()?;
    Ok(ImageInfo {
        format,
        width: header.width,
        height: header.height,
        channels: header.native_channels(),
        bit_depth: header.bit_depth,
    })
}
