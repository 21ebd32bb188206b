//! Windows bitmap decoding.
//!
//! Supports the OS/2 core header and the Windows info header with its later
//! extensions, uncompressed 1/4/8/16/24/32 bpp data, RLE8, RLE4 and bitfield
//! masks.

use log::{debug, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::bytes::ByteReader;
use crate::error::{Error, Result};
use crate::image::{ColorLayout, ImageDecoder, ImageHeader, Palette, Scanline};
use crate::options::Limits;

const FILE_HEADER_LEN: usize = 14;
const CORE_HEADER_LEN: u32 = 12;
const INFO_HEADER_LEN: u32 = 40;
const INFO_HEADER_SIZES: [u32; 5] = [40, 52, 56, 108, 124];

#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Rgb = 0,
    Rle8 = 1,
    Rle4 = 2,
    Bitfields = 3,
    Jpeg = 4,
    Png = 5,
    AlphaBitfields = 6,
    Cmyk = 11,
    CmykRle8 = 12,
    CmykRle4 = 13,
}

/// One channel of a bitfield mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mask {
    mask: u32,
    shift: u32,
    bits: u32,
}

impl Mask {
    fn new(mask: u32) -> Result<Self> {
        let shift = if mask == 0 { 0 } else { mask.trailing_zeros() };
        let bits = mask.count_ones();
        let normalized = mask >> shift;
        if normalized & normalized.wrapping_add(1) != 0 {
            return Err(Error::CorruptData("BMP bitfield mask is not contiguous"));
        }
        Ok(Self { mask, shift, bits })
    }

    /// The channel scaled to 8 bits.
    fn extract(&self, pixel: u32) -> u8 {
        if self.bits == 0 {
            return 0;
        }
        let value = (pixel & self.mask) >> self.shift;
        if self.bits >= 8 {
            (value >> (self.bits - 8)) as u8
        } else {
            let max = (1u32 << self.bits) - 1;
            ((value * 255 + max / 2) / max) as u8
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bitfields {
    red: Mask,
    green: Mask,
    blue: Mask,
    alpha: Option<Mask>,
}

impl Bitfields {
    fn from_masks(red: u32, green: u32, blue: u32, alpha: u32) -> Result<Self> {
        Ok(Self {
            red: Mask::new(red)?,
            green: Mask::new(green)?,
            blue: Mask::new(blue)?,
            alpha: if alpha == 0 {
                None
            } else {
                Some(Mask::new(alpha)?)
            },
        })
    }

    fn defaults(bits_per_pixel: u16) -> Result<Self> {
        if bits_per_pixel == 16 {
            Self::from_masks(0x7C00, 0x03E0, 0x001F, 0)
        } else {
            Self::from_masks(0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BmpInfo {
    width: u32,
    height: u32,
    top_down: bool,
    bits_per_pixel: u16,
    compression: Compression,
    bitfields: Option<Bitfields>,
    pixel_offset: usize,
    layout: ColorLayout,
}

impl BmpInfo {
    /// Bytes between the starts of two rows of the pixel array.
    fn stride(&self) -> usize {
        (self.width as usize * self.bits_per_pixel as usize).div_ceil(32) * 4
    }

    /// Bytes a row actually uses, without padding.
    fn used_bytes(&self) -> usize {
        (self.width as usize * self.bits_per_pixel as usize).div_ceil(8)
    }

    fn row_len(&self) -> usize {
        self.width as usize * self.layout.samples_per_pixel()
    }

    fn is_rle(&self) -> bool {
        matches!(self.compression, Compression::Rle8 | Compression::Rle4)
    }

    /// RLE data and images with alpha are decoded whole before rows are handed
    /// out.
    fn is_buffered(&self) -> bool {
        self.is_rle() || self.layout == ColorLayout::Rgba
    }
}

/// Used to decode a Windows bitmap
pub struct BmpDecoder<'data> {
    data: &'data [u8],
    limits: Limits,
    info: Option<BmpInfo>,
    pixels: Option<Vec<u8>>,
    next_row: u32,
    row: Vec<u8>,
}

impl<'data> BmpDecoder<'data> {
    fn decode_all(&self, info: &BmpInfo) -> Result<Vec<u8>> {
        if info.is_rle() {
            return self.decode_rle(info);
        }

        let row_len = info.row_len();
        let mut pixels = vec![0u8; row_len * info.height as usize];
        for file_row in 0..info.height {
            let src = self.file_row(info, file_row)?;
            let y = output_row(info, file_row) as usize;
            decode_row(info, src, &mut pixels[y * row_len..(y + 1) * row_len]);
        }

        if info.layout == ColorLayout::Rgba && pixels.chunks_exact(4).all(|pixel| pixel[3] == 0) {
            warn!("BMP alpha channel is zero everywhere, treating the image as opaque");
            for pixel in pixels.chunks_exact_mut(4) {
                pixel[3] = 255;
            }
        }
        Ok(pixels)
    }

    fn file_row(&self, info: &BmpInfo, file_row: u32) -> Result<&'data [u8]> {
        let start = info.pixel_offset + file_row as usize * info.stride();
        self.data
            .get(start..start + info.used_bytes())
            .ok_or(Error::TruncatedInput)
    }

    /// Expands RLE8/RLE4 data into one palette index per pixel. Pixels the
    /// stream skips over keep index 0.
    fn decode_rle(&self, info: &BmpInfo) -> Result<Vec<u8>> {
        let width = info.width as usize;
        let height = info.height as usize;
        let nibbles = info.compression == Compression::Rle4;
        let mut pixels = vec![0u8; width * height];

        let mut reader = ByteReader::new(self.data);
        reader.seek_to(info.pixel_offset)?;

        // RLE rows count up from the bottom of the image.
        let (mut x, mut row) = (0usize, 0usize);
        let mut put = |x: usize, row: usize, index: u8| {
            if x < width && row < height {
                pixels[(height - 1 - row) * width + x] = index;
            }
        };

        loop {
            let count = reader.read_u8()?;
            let value = reader.read_u8()?;
            if count > 0 {
                for n in 0..count as usize {
                    let index = match (nibbles, n % 2) {
                        (false, _) => value,
                        (true, 0) => value >> 4,
                        (true, _) => value & 0x0F,
                    };
                    put(x, row, index);
                    x += 1;
                }
                continue;
            }

            match value {
                0 => {
                    x = 0;
                    row += 1;
                }
                1 => break,
                2 => {
                    x += reader.read_u8()? as usize;
                    row += reader.read_u8()? as usize;
                }
                literal => {
                    let literal = literal as usize;
                    let len = if nibbles { literal.div_ceil(2) } else { literal };
                    let run = reader.read_slice(len)?;
                    for n in 0..literal {
                        let index = if nibbles {
                            (run[n / 2] >> (4 * (1 - n % 2))) & 0x0F
                        } else {
                            run[n]
                        };
                        put(x, row, index);
                        x += 1;
                    }
                    // literal runs are padded to 16 bits
                    if len % 2 == 1 {
                        reader.skip(1)?;
                    }
                }
            }
        }
        Ok(pixels)
    }
}

/// Where file row `file_row` lands in the top-down output.
fn output_row(info: &BmpInfo, file_row: u32) -> u32 {
    if info.top_down {
        file_row
    } else {
        info.height - 1 - file_row
    }
}

/// Converts one row of uncompressed pixel data to the native layout.
fn decode_row(info: &BmpInfo, src: &[u8], out: &mut [u8]) {
    match (info.bits_per_pixel, info.bitfields) {
        (1 | 4 | 8, _) => {
            let depth = info.bits_per_pixel as usize;
            let mask = ((1u16 << depth) - 1) as u8;
            for (x, index) in out.iter_mut().enumerate() {
                let bit = x * depth;
                *index = (src[bit / 8] >> (8 - depth - bit % 8)) & mask;
            }
        }
        (16 | 32, Some(fields)) => {
            let bytes = info.bits_per_pixel as usize / 8;
            let samples = info.layout.samples_per_pixel();
            for (pixel, rgba) in src.chunks_exact(bytes).zip(out.chunks_exact_mut(samples)) {
                let value = if bytes == 2 {
                    u16::from_le_bytes([pixel[0], pixel[1]]) as u32
                } else {
                    u32::from_le_bytes([pixel[0], pixel[1], pixel[2], pixel[3]])
                };
                rgba[0] = fields.red.extract(value);
                rgba[1] = fields.green.extract(value);
                rgba[2] = fields.blue.extract(value);
                if let Some(alpha) = fields.alpha {
                    rgba[3] = alpha.extract(value);
                }
            }
        }
        _ => {
            // 24 bpp: BGR
            for (bgr, rgb) in src.chunks_exact(3).zip(out.chunks_exact_mut(3)) {
                rgb.copy_from_slice(&[bgr[2], bgr[1], bgr[0]]);
            }
        }
    }
}

impl<'data> ImageDecoder<'data> for BmpDecoder<'data> {
    fn new(data: &'data [u8], limits: Limits) -> Self {
        Self {
            data,
            limits,
            info: None,
            pixels: None,
            next_row: 0,
            row: Vec::new(),
        }
    }

    fn read_header(&mut self) -> Result<ImageHeader> {
        let mut reader = ByteReader::new(self.data);
        if reader.read_slice(2)? != b"BM" {
            return Err(Error::CorruptData("bad BMP signature"));
        }
        reader.skip(8)?; // file size, reserved
        let pixel_offset = reader.read_u32_le()? as usize;
        let header_size = reader.read_u32_le()?;

        let width;
        let height;
        let planes;
        let bits_per_pixel;
        let mut compression = Compression::Rgb;
        let mut colors_used = 0;
        let mut masks = None;

        if header_size == CORE_HEADER_LEN {
            width = reader.read_u16_le()? as i32;
            height = reader.read_u16_le()? as i32;
            planes = reader.read_u16_le()?;
            bits_per_pixel = reader.read_u16_le()?;
        } else if INFO_HEADER_SIZES.contains(&header_size) {
            width = reader.read_i32_le()?;
            height = reader.read_i32_le()?;
            planes = reader.read_u16_le()?;
            bits_per_pixel = reader.read_u16_le()?;
            let method = reader.read_u32_le()?;
            compression = Compression::from_u32(method)
                .ok_or(Error::CorruptData("unknown BMP compression method"))?;
            reader.skip(12)?; // image size, resolution
            colors_used = reader.read_u32_le()?;
            reader.skip(4)?; // important colors

            let bitfields = matches!(
                compression,
                Compression::Bitfields | Compression::AlphaBitfields
            );
            // Masks live inside v2+ headers, or right after an info header.
            let mask_count = match header_size {
                INFO_HEADER_LEN if compression == Compression::AlphaBitfields => 4,
                INFO_HEADER_LEN if bitfields => 3,
                INFO_HEADER_LEN => 0,
                52 => 3,
                _ => 4,
            };
            let mut values = [0u32; 4];
            for value in values.iter_mut().take(mask_count) {
                *value = reader.read_u32_le()?;
            }
            if header_size > INFO_HEADER_LEN {
                let mask_bytes = mask_count as u32 * 4;
                reader.skip((header_size - INFO_HEADER_LEN - mask_bytes) as usize)?;
            }
            if bitfields {
                masks = Some(values);
            }
        } else {
            return Err(Error::CorruptData("unknown BMP header size"));
        }

        if width <= 0 || height == 0 {
            return Err(Error::CorruptData("zero image dimension"));
        }
        if planes != 1 {
            return Err(Error::CorruptData("BMP plane count is not 1"));
        }
        let top_down = height < 0;
        let (width, height) = (width as u32, height.unsigned_abs());

        match (compression, bits_per_pixel) {
            (Compression::Rgb, 1 | 4 | 8 | 16 | 24 | 32)
            | (Compression::Rle8, 8)
            | (Compression::Rle4, 4)
            | (Compression::Bitfields | Compression::AlphaBitfields, 16 | 32) => {}
            (
                Compression::Jpeg
                | Compression::Png
                | Compression::Cmyk
                | Compression::CmykRle8
                | Compression::CmykRle4,
                _,
            ) => return Err(Error::UnsupportedFeature("BMP compression method")),
            _ => return Err(Error::CorruptData("invalid BMP bit depth for compression")),
        }
        if top_down && matches!(compression, Compression::Rle8 | Compression::Rle4) {
            return Err(Error::CorruptData("RLE bitmaps cannot be top-down"));
        }

        let bitfields = match (bits_per_pixel, masks) {
            (16 | 32, Some([red, green, blue, alpha])) => {
                Some(Bitfields::from_masks(red, green, blue, alpha)?)
            }
            (16 | 32, None) => Some(Bitfields::defaults(bits_per_pixel)?),
            _ => None,
        };

        let mut palette = None;
        let layout = match (bits_per_pixel, bitfields) {
            (1 | 4 | 8, _) => {
                let entry_len = if header_size == CORE_HEADER_LEN { 3 } else { 4 };
                // Without a color count, the table fills the gap before the
                // pixel data.
                let room = pixel_offset.saturating_sub(reader.position()) / entry_len;
                let count = match colors_used as usize {
                    0 => (1usize << bits_per_pixel).min(room),
                    n => n.min(256),
                };
                let entries = reader.read_slice(count * entry_len)?;
                palette = Some(Palette::new(
                    entries
                        .chunks_exact(entry_len)
                        .map(|bgr| [bgr[2], bgr[1], bgr[0], 255])
                        .collect(),
                ));
                ColorLayout::Indexed
            }
            (_, Some(Bitfields { alpha: Some(_), .. })) => ColorLayout::Rgba,
            _ => ColorLayout::Rgb,
        };

        if pixel_offset < FILE_HEADER_LEN {
            return Err(Error::CorruptData("BMP pixel data offset inside the file header"));
        }
        self.limits
            .check(width, height, layout.samples_per_pixel())?;

        let info = BmpInfo {
            width,
            height,
            top_down,
            bits_per_pixel,
            compression,
            bitfields,
            pixel_offset,
            layout,
        };
        debug!(
            "BMP: {}x{} {} bpp {:?} ({} header, top-down {})",
            width, height, bits_per_pixel, compression, header_size, top_down
        );
        self.row = vec![0; info.row_len()];
        self.info = Some(info);

        Ok(ImageHeader {
            width,
            height,
            layout,
            bit_depth: 8,
            palette,
        })
    }

    fn read_row(&mut self) -> Result<Option<Scanline<'_>>> {
        let info = self
            .info
            .ok_or(Error::InternalError("read_row called before read_header"))?;
        if self.next_row >= info.height {
            return Ok(None);
        }
        let file_row = self.next_row;
        self.next_row += 1;

        if info.is_buffered() {
            if self.pixels.is_none() {
                self.pixels = Some(self.decode_all(&info)?);
            }
            let row_len = info.row_len();
            let start = file_row as usize * row_len;
            let data = self
                .pixels
                .as_deref()
                .and_then(|pixels| pixels.get(start..start + row_len))
                .ok_or(Error::InternalError("decoded BMP is too small"))?;
            return Ok(Some(Scanline { y: file_row, data }));
        }

        let src = self.file_row(&info, file_row)?;
        decode_row(&info, src, &mut self.row);
        Ok(Some(Scanline {
            y: output_row(&info, file_row),
            data: &self.row,
        }))
    }
}
