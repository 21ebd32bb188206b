//! Converts decoder-native scanlines to the caller's channel count.
//!
//! | native            | 1 channel | 2 channels   | 3 channels | 4 channels |
//! |-------------------|-----------|--------------|------------|------------|
//! | gray              | copy      | + opaque     | replicate  | replicate + opaque |
//! | gray + alpha      | drop alpha| copy         | replicate  | replicate  |
//! | rgb               | luma      | luma + opaque| copy       | + opaque   |
//! | rgba              | luma      | luma + alpha | drop alpha | copy       |
//!
//! Indexed pixels go through the palette first, YCbCr/CMYK/YCCK through a
//! color transform, and are then treated as RGB or RGBA. Alpha is never
//! blended into color.

use byteorder::{ByteOrder, NativeEndian};
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::image::{ColorLayout, Image, Palette};
use crate::options::Limits;

enum Color {
    Gray(u16),
    Rgb([u16; 3]),
}

/// Row converter for one (native layout, target channels) pair. `B` is the
/// byte order of 16-bit source samples.
pub struct Normalizer<'p, B: ByteOrder> {
    layout: ColorLayout,
    palette: Option<&'p Palette>,
    src_depth: u8,
    dst_depth: u8,
    channels: u8,
    _order: PhantomData<B>,
}

impl<'p, B: ByteOrder> Normalizer<'p, B> {
    /// Builds a converter. `dst_depth` may only be 16 if `src_depth` is.
    pub fn new(
        layout: ColorLayout,
        palette: Option<&'p Palette>,
        src_depth: u8,
        dst_depth: u8,
        channels: u8,
    ) -> Result<Self> {
        if !(1..=4).contains(&channels) {
            return Err(Error::UnsupportedConversion {
                requested: channels,
            });
        }
        match (src_depth, dst_depth) {
            (8, 8) | (16, 8) | (16, 16) => {}
            _ => return Err(Error::InternalError("unsupported sample depth conversion")),
        }
        let color_transformed = matches!(
            layout,
            ColorLayout::Indexed | ColorLayout::YCbCr | ColorLayout::Cmyk | ColorLayout::Ycck
        );
        if color_transformed && src_depth != 8 {
            return Err(Error::InternalError("color transforms need 8-bit samples"));
        }
        if layout == ColorLayout::Indexed && palette.is_none() {
            return Err(Error::InternalError("indexed image without a palette"));
        }

        Ok(Self {
            layout,
            palette,
            src_depth,
            dst_depth,
            channels,
            _order: PhantomData,
        })
    }

    fn max_value(&self) -> u16 {
        if self.dst_depth == 16 {
            u16::MAX
        } else {
            u8::MAX as u16
        }
    }

    fn sample(&self, pixel: &[u8], index: usize) -> u16 {
        if self.src_depth == 16 {
            let value = B::read_u16(&pixel[index * 2..]);
            if self.dst_depth == 8 {
                value >> 8
            } else {
                value
            }
        } else {
            pixel[index] as u16
        }
    }

    fn read_pixel(&self, pixel: &[u8]) -> (Color, Option<u16>) {
        match self.layout {
            ColorLayout::Gray => (Color::Gray(self.sample(pixel, 0)), None),
            ColorLayout::GrayAlpha => (
                Color::Gray(self.sample(pixel, 0)),
                Some(self.sample(pixel, 1)),
            ),
            ColorLayout::Rgb => (
                Color::Rgb([
                    self.sample(pixel, 0),
                    self.sample(pixel, 1),
                    self.sample(pixel, 2),
                ]),
                None,
            ),
            ColorLayout::Rgba => (
                Color::Rgb([
                    self.sample(pixel, 0),
                    self.sample(pixel, 1),
                    self.sample(pixel, 2),
                ]),
                Some(self.sample(pixel, 3)),
            ),
            ColorLayout::Indexed => match self.palette {
                Some(palette) => {
                    let [r, g, b, a] = palette.get(pixel[0]);
                    let alpha = palette.has_alpha().then_some(a as u16);
                    (Color::Rgb([r as u16, g as u16, b as u16]), alpha)
                }
                // new() refuses indexed layouts without a palette
                None => (Color::Gray(pixel[0] as u16), None),
            },
            ColorLayout::YCbCr => (Color::Rgb(ycbcr_to_rgb(pixel[0], pixel[1], pixel[2])), None),
            ColorLayout::Cmyk => {
                let k = pixel[3];
                (
                    Color::Rgb([
                        blinn(pixel[0], k) as u16,
                        blinn(pixel[1], k) as u16,
                        blinn(pixel[2], k) as u16,
                    ]),
                    None,
                )
            }
            ColorLayout::Ycck => {
                let k = pixel[3];
                let [r, g, b] = ycbcr_to_rgb(pixel[0], pixel[1], pixel[2]);
                (
                    Color::Rgb([
                        blinn(255 - r as u8, k) as u16,
                        blinn(255 - g as u8, k) as u16,
                        blinn(255 - b as u8, k) as u16,
                    ]),
                    None,
                )
            }
        }
    }

    fn write_pixel(&self, color: Color, alpha: Option<u16>, out: &mut [u8]) {
        let opaque = self.max_value();
        let mut samples = [0u16; 4];
        let values: &[u16] = match (self.channels, color) {
            (1, Color::Gray(g)) => {
                samples[0] = g;
                &samples[..1]
            }
            (1, Color::Rgb(rgb)) => {
                samples[0] = luma(rgb);
                &samples[..1]
            }
            (2, Color::Gray(g)) => {
                samples[..2].copy_from_slice(&[g, alpha.unwrap_or(opaque)]);
                &samples[..2]
            }
            (2, Color::Rgb(rgb)) => {
                samples[..2].copy_from_slice(&[luma(rgb), alpha.unwrap_or(opaque)]);
                &samples[..2]
            }
            (3, Color::Gray(g)) => {
                samples[..3].copy_from_slice(&[g, g, g]);
                &samples[..3]
            }
            (3, Color::Rgb(rgb)) => {
                samples[..3].copy_from_slice(&rgb);
                &samples[..3]
            }
            (_, Color::Gray(g)) => {
                samples = [g, g, g, alpha.unwrap_or(opaque)];
                &samples
            }
            (_, Color::Rgb([r, g, b])) => {
                samples = [r, g, b, alpha.unwrap_or(opaque)];
                &samples
            }
        };

        if self.dst_depth == 16 {
            for (chunk, value) in out.chunks_exact_mut(2).zip(values) {
                chunk.copy_from_slice(&value.to_ne_bytes());
            }
        } else {
            for (byte, value) in out.iter_mut().zip(values) {
                *byte = *value as u8;
            }
        }
    }

    fn is_passthrough(&self) -> bool {
        ColorLayout::from_channels(self.channels) == Some(self.layout)
            && self.src_depth == self.dst_depth
    }

    /// Converts one row. `src` holds `width` native pixels and `dst` has room
    /// for `width` output pixels.
    pub fn convert_row(&self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        let src_pixel = self.layout.samples_per_pixel() * (self.src_depth as usize / 8);
        let dst_pixel = self.channels as usize * (self.dst_depth as usize / 8);
        if src.len() / src_pixel != dst.len() / dst_pixel || src.len() % src_pixel != 0 {
            return Err(Error::InternalError("scanline length does not match image width"));
        }

        if self.is_passthrough() {
            if self.dst_depth == 16 {
                for (out, sample) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
                    out.copy_from_slice(&B::read_u16(sample).to_ne_bytes());
                }
            } else {
                dst.copy_from_slice(src);
            }
            return Ok(());
        }

        for (pixel, out) in src.chunks_exact(src_pixel).zip(dst.chunks_exact_mut(dst_pixel)) {
            let (color, alpha) = self.read_pixel(pixel);
            self.write_pixel(color, alpha, out);
        }
        Ok(())
    }
}

fn luma([r, g, b]: [u16; 3]) -> u16 {
    ((r as u32 * 77 + g as u32 * 150 + b as u32 * 29) >> 8) as u16
}

/// x * y / 255, rounded.
fn blinn(x: u8, y: u8) -> u8 {
    let t = x as u32 * y as u32 + 128;
    ((t + (t >> 8)) >> 8) as u8
}

fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u16; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;

    let r = y + 1.402 * cr;
    let g = y - 0.344_136 * cb - 0.714_136 * cr;
    let b = y + 1.772 * cb;

    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(value: f32) -> u16 {
    value.round().clamp(0.0, 255.0) as u16
}

/// Converts an already decoded image to `channels` (0 keeps it as is).
pub fn convert_image(image: Image, channels: u8) -> Result<Image> {
    if channels == 0 || channels == image.channels {
        return Ok(image);
    }
    let layout = ColorLayout::from_channels(image.channels)
        .ok_or(Error::InternalError("image has an invalid channel count"))?;
    let normalizer =
        Normalizer::<NativeEndian>::new(layout, None, image.bit_depth, image.bit_depth, channels)?;

    let sample_bytes = image.bit_depth as usize / 8;
    let len = Limits::unlimited().check(
        image.width,
        image.height,
        channels as usize * sample_bytes,
    )?;
    let mut pixels = vec![0u8; len];

    let src_stride = image.stride();
    let dst_stride = image.width as usize * channels as usize * sample_bytes;
    if src_stride > 0 && dst_stride > 0 {
        for (src, dst) in image
            .pixels
            .chunks_exact(src_stride)
            .zip(pixels.chunks_exact_mut(dst_stride))
        {
            normalizer.convert_row(src, dst)?;
        }
    }

    Ok(Image {
        channels,
        pixels,
        ..image
    })
}
