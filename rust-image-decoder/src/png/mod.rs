//! PNG decoding: chunk walk, zlib inflate, unfiltering and Adam7.

mod chunk;
mod filter;
mod interlace;

use log::{debug, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::bytes::ByteReader;
use crate::error::{Error, Result};
use crate::image::{ColorLayout, ImageDecoder, ImageHeader, Palette, Scanline};
use crate::inflate::inflate_zlib;
use crate::options::Limits;
use chunk::{read_chunk, Chunk, IDAT, IEND, IHDR, PLTE, TRNS};
use interlace::ADAM7;

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
enum PngColorType {
    Gray = 0,
    Rgb = 2,
    Indexed = 3,
    GrayAlpha = 4,
    Rgba = 6,
}

impl PngColorType {
    fn samples(self) -> usize {
        match self {
            PngColorType::Gray | PngColorType::Indexed => 1,
            PngColorType::GrayAlpha => 2,
            PngColorType::Rgb => 3,
            PngColorType::Rgba => 4,
        }
    }

    fn allows_depth(self, depth: u8) -> bool {
        match self {
            PngColorType::Gray => matches!(depth, 1 | 2 | 4 | 8 | 16),
            PngColorType::Indexed => matches!(depth, 1 | 2 | 4 | 8),
            _ => matches!(depth, 8 | 16),
        }
    }

    fn layout(self) -> ColorLayout {
        match self {
            PngColorType::Gray => ColorLayout::Gray,
            PngColorType::Rgb => ColorLayout::Rgb,
            PngColorType::Indexed => ColorLayout::Indexed,
            PngColorType::GrayAlpha => ColorLayout::GrayAlpha,
            PngColorType::Rgba => ColorLayout::Rgba,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Ihdr {
    width: u32,
    height: u32,
    color: PngColorType,
    depth: u8,
    interlaced: bool,
}

impl Ihdr {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != 13 {
            return Err(Error::CorruptData("IHDR has the wrong length"));
        }
        let mut reader = ByteReader::new(data);
        let width = reader.read_u32_be()?;
        let height = reader.read_u32_be()?;
        let depth = reader.read_u8()?;
        let color = PngColorType::from_u8(reader.read_u8()?)
            .ok_or(Error::CorruptData("invalid PNG color type"))?;
        let compression = reader.read_u8()?;
        let filter_method = reader.read_u8()?;
        let interlace_method = reader.read_u8()?;

        if !color.allows_depth(depth) {
            return Err(Error::CorruptData("invalid bit depth for color type"));
        }
        if compression != 0 {
            return Err(Error::CorruptData("unknown compression method"));
        }
        if filter_method != 0 {
            return Err(Error::CorruptData("unknown filter method"));
        }
        let interlaced = match interlace_method {
            0 => false,
            1 => true,
            _ => return Err(Error::CorruptData("unknown interlace method")),
        };
        if width == 0 || height == 0 {
            return Err(Error::CorruptData("zero image dimension"));
        }

        Ok(Self {
            width,
            height,
            color,
            depth,
            interlaced,
        })
    }

    fn bits_per_pixel(&self) -> usize {
        self.color.samples() * self.depth as usize
    }

    /// Distance in bytes to the corresponding byte of the previous pixel.
    fn filter_step(&self) -> usize {
        (self.bits_per_pixel() / 8).max(1)
    }

    /// Bytes in one filtered line of `width` pixels, excluding the filter byte.
    fn line_bytes(&self, width: u32) -> usize {
        (width as usize * self.bits_per_pixel()).div_ceil(8)
    }

    fn out_depth(&self) -> u8 {
        if self.depth == 16 {
            16
        } else {
            8
        }
    }

    /// Total size of the decompressed stream, filter bytes included.
    fn data_size(&self) -> Result<usize> {
        let overflow = Error::DimensionOverflow {
            width: self.width,
            height: self.height,
        };
        let passes: Vec<(u32, u32)> = if self.interlaced {
            ADAM7
                .iter()
                .map(|pass| pass.size(self.width, self.height))
                .collect()
        } else {
            vec![(self.width, self.height)]
        };

        passes
            .into_iter()
            .filter(|&(width, height)| width > 0 && height > 0)
            .try_fold(0usize, |total, (width, height)| {
                (self.line_bytes(width) + 1)
                    .checked_mul(height as usize)
                    .and_then(|size| total.checked_add(size))
                    .ok_or(overflow)
            })
    }
}

enum Pixels {
    Pending,
    Streaming { data: Vec<u8>, offset: usize },
    Deinterlaced(Vec<u8>),
}

/// Used to decode a PNG image
pub struct PngDecoder<'data> {
    reader: ByteReader<'data>,
    limits: Limits,
    ihdr: Option<Ihdr>,
    layout: ColorLayout,
    color_key: Option<[u16; 3]>,
    pixels: Pixels,
    next_row: u32,
    row: Vec<u8>,
    line: Vec<u8>,
    previous: Vec<u8>,
}

impl<'data> PngDecoder<'data> {
    fn pixel_bytes(&self, ihdr: &Ihdr) -> usize {
        self.layout.samples_per_pixel() * (ihdr.out_depth() as usize / 8)
    }

    /// Concatenates the IDAT run and walks the remaining chunks up to IEND.
    fn collect_idat(&mut self) -> Result<Vec<u8>> {
        let mut compressed = Vec::new();
        let mut idat_ended = false;
        loop {
            let chunk = read_chunk(&mut self.reader)?;
            match chunk.kind {
                IDAT if idat_ended => {
                    return Err(Error::CorruptData("IDAT chunks are not consecutive"))
                }
                IDAT => compressed.extend_from_slice(chunk.data),
                IEND => break,
                IHDR | PLTE => return Err(Error::CorruptData("misplaced critical chunk")),
                _ => {
                    idat_ended = true;
                    skip_unknown(&chunk)?;
                }
            }
        }
        Ok(compressed)
    }

    fn load_pixels(&mut self, ihdr: &Ihdr) -> Result<()> {
        let compressed = self.collect_idat()?;
        let data = inflate_zlib(&compressed, ihdr.data_size()?)?;
        debug!(
            "PNG: inflated {} bytes into {}",
            compressed.len(),
            data.len()
        );

        let pixel_bytes = self.pixel_bytes(ihdr);
        self.row = vec![0; ihdr.width as usize * pixel_bytes];
        if ihdr.interlaced {
            let image = deinterlace(ihdr, self.color_key, &data, pixel_bytes)?;
            self.pixels = Pixels::Deinterlaced(image);
        } else {
            let len = ihdr.line_bytes(ihdr.width);
            self.line = vec![0; len];
            self.previous = vec![0; len];
            self.pixels = Pixels::Streaming { data, offset: 0 };
        }
        Ok(())
    }
}

impl<'data> ImageDecoder<'data> for PngDecoder<'data> {
    fn new(data: &'data [u8], limits: Limits) -> Self {
        Self {
            reader: ByteReader::new(data),
            limits,
            ihdr: None,
            layout: ColorLayout::Gray,
            color_key: None,
            pixels: Pixels::Pending,
            next_row: 0,
            row: Vec::new(),
            line: Vec::new(),
            previous: Vec::new(),
        }
    }

    fn read_header(&mut self) -> Result<ImageHeader> {
        let signature = self.reader.read_slice(SIGNATURE.len())?;
        if signature != SIGNATURE {
            return Err(Error::CorruptData("bad PNG signature"));
        }

        let first = read_chunk(&mut self.reader)?;
        if first.kind != IHDR {
            return Err(Error::CorruptData("first chunk must be IHDR"));
        }
        let ihdr = Ihdr::parse(first.data)?;
        let sample_bytes = ihdr.out_depth() as usize / 8;
        self.limits
            .check(ihdr.width, ihdr.height, ihdr.color.samples() * sample_bytes)?;

        let mut plte: Option<&[u8]> = None;
        let mut trns: Option<&[u8]> = None;
        loop {
            let start = self.reader.position();
            let chunk = read_chunk(&mut self.reader)?;
            match chunk.kind {
                IDAT => {
                    self.reader.seek_to(start)?;
                    break;
                }
                PLTE => {
                    if matches!(ihdr.color, PngColorType::Gray | PngColorType::GrayAlpha) {
                        return Err(Error::CorruptData("PLTE chunk in grayscale PNG"));
                    }
                    if chunk.data.is_empty() || chunk.data.len() % 3 != 0 || chunk.data.len() > 768
                    {
                        return Err(Error::CorruptData("invalid PLTE length"));
                    }
                    plte = Some(chunk.data);
                }
                TRNS => trns = Some(chunk.data),
                IEND => return Err(Error::CorruptData("no IDAT chunk")),
                IHDR => return Err(Error::CorruptData("duplicate IHDR chunk")),
                _ => skip_unknown(&chunk)?,
            }
        }

        let mut layout = ihdr.color.layout();
        let mut palette = None;
        if ihdr.color == PngColorType::Indexed {
            let entries = plte.ok_or(Error::CorruptData("indexed PNG without PLTE"))?;
            palette = Some(Palette::from_rgb(entries));
        }

        if let Some(trns) = trns {
            match (ihdr.color, palette.as_mut()) {
                (PngColorType::Indexed, Some(palette)) => {
                    if trns.len() > plte.map_or(0, |entries| entries.len() / 3) {
                        return Err(Error::CorruptData("tRNS has more entries than PLTE"));
                    }
                    for (index, &alpha) in trns.iter().enumerate() {
                        palette.set_alpha(index, alpha);
                    }
                }
                (PngColorType::Gray, _) => {
                    if trns.len() != 2 {
                        return Err(Error::CorruptData("bad tRNS length"));
                    }
                    self.color_key = Some([u16::from_be_bytes([trns[0], trns[1]]), 0, 0]);
                    layout = ColorLayout::GrayAlpha;
                }
                (PngColorType::Rgb, _) => {
                    if trns.len() != 6 {
                        return Err(Error::CorruptData("bad tRNS length"));
                    }
                    let mut key = [0u16; 3];
                    for (value, pair) in key.iter_mut().zip(trns.chunks_exact(2)) {
                        *value = u16::from_be_bytes([pair[0], pair[1]]);
                    }
                    self.color_key = Some(key);
                    layout = ColorLayout::Rgba;
                }
                _ => warn!("ignoring tRNS chunk on a PNG with an alpha channel"),
            }
        }

        self.layout = layout;
        self.limits.check(
            ihdr.width,
            ihdr.height,
            layout.samples_per_pixel() * sample_bytes,
        )?;
        self.ihdr = Some(ihdr);

        debug!(
            "PNG: {}x{} {:?} depth {} interlaced {}",
            ihdr.width, ihdr.height, ihdr.color, ihdr.depth, ihdr.interlaced
        );
        Ok(ImageHeader {
            width: ihdr.width,
            height: ihdr.height,
            layout,
            bit_depth: ihdr.out_depth(),
            palette,
        })
    }

    fn read_row(&mut self) -> Result<Option<Scanline<'_>>> {
        let ihdr = self
            .ihdr
            .ok_or(Error::InternalError("read_row called before read_header"))?;
        if self.next_row >= ihdr.height {
            return Ok(None);
        }
        if matches!(self.pixels, Pixels::Pending) {
            self.load_pixels(&ihdr)?;
        }

        let y = self.next_row;
        self.next_row += 1;
        match &mut self.pixels {
            Pixels::Streaming { data, offset } => {
                let filter_type = next_line(data, offset, &mut self.line)?;
                filter::unfilter(
                    filter_type,
                    &mut self.line,
                    &self.previous,
                    ihdr.filter_step(),
                )?;
                expand_line(&ihdr, self.color_key, &self.line, &mut self.row);
                std::mem::swap(&mut self.line, &mut self.previous);
                Ok(Some(Scanline { y, data: &self.row }))
            }
            Pixels::Deinterlaced(image) => {
                let stride = self.row.len();
                let start = y as usize * stride;
                let data = image
                    .get(start..start + stride)
                    .ok_or(Error::InternalError("deinterlaced image is too small"))?;
                Ok(Some(Scanline { y, data }))
            }
            Pixels::Pending => Err(Error::InternalError("PNG pixel data not loaded")),
        }
    }
}

fn skip_unknown(chunk: &Chunk<'_>) -> Result<()> {
    if chunk.is_critical() {
        return Err(Error::UnsupportedFeature("unknown critical PNG chunk"));
    }
    Ok(())
}

/// Copies the next filtered line into `line` and returns its filter type.
fn next_line(data: &[u8], offset: &mut usize, line: &mut [u8]) -> Result<u8> {
    let end = *offset + 1 + line.len();
    let filtered = data
        .get(*offset..end)
        .ok_or(Error::InternalError("decompressed data shorter than expected"))?;
    line.copy_from_slice(&filtered[1..]);
    *offset = end;
    Ok(filtered[0])
}

/// Converts one unfiltered line to 8 or 16-bit samples, unpacking sub-byte
/// pixels and appending color-key alpha.
fn expand_line(ihdr: &Ihdr, key: Option<[u16; 3]>, raw: &[u8], out: &mut [u8]) {
    if ihdr.depth < 8 {
        let depth = ihdr.depth as usize;
        let mask = (1u8 << depth) - 1;
        // Gray is stretched to 0..=255; palette indices stay as they are.
        let scale = if ihdr.color == PngColorType::Gray {
            255 / mask
        } else {
            1
        };
        let step = if key.is_some() { 2 } else { 1 };
        for (x, pixel) in out.chunks_exact_mut(step).enumerate() {
            let bit = x * depth;
            let value = (raw[bit / 8] >> (8 - depth - bit % 8)) & mask;
            pixel[0] = value * scale;
            if let Some(key) = key {
                pixel[1] = if value as u16 == key[0] { 0 } else { 255 };
            }
        }
        return;
    }

    let Some(key) = key else {
        out.copy_from_slice(raw);
        return;
    };

    let samples = ihdr.color.samples();
    let sample_bytes = ihdr.depth as usize / 8;
    let in_pixel = samples * sample_bytes;
    for (src, dst) in raw
        .chunks_exact(in_pixel)
        .zip(out.chunks_exact_mut(in_pixel + sample_bytes))
    {
        let keyed = (0..samples).all(|i| {
            let value = if sample_bytes == 2 {
                u16::from_be_bytes([src[2 * i], src[2 * i + 1]])
            } else {
                src[i] as u16
            };
            value == key[i]
        });
        dst[..in_pixel].copy_from_slice(src);
        dst[in_pixel..].fill(if keyed { 0 } else { 0xFF });
    }
}

/// Unfilters the seven passes and scatters their pixels into a full image.
fn deinterlace(
    ihdr: &Ihdr,
    key: Option<[u16; 3]>,
    data: &[u8],
    pixel_bytes: usize,
) -> Result<Vec<u8>> {
    let stride = ihdr.width as usize * pixel_bytes;
    let mut image = vec![0u8; stride * ihdr.height as usize];
    let mut offset = 0;

    for pass in ADAM7 {
        let (width, height) = pass.size(ihdr.width, ihdr.height);
        if width == 0 || height == 0 {
            continue;
        }
        let len = ihdr.line_bytes(width);
        let mut line = vec![0u8; len];
        let mut previous = vec![0u8; len];
        let mut expanded = vec![0u8; width as usize * pixel_bytes];

        for py in 0..height {
            let filter_type = next_line(data, &mut offset, &mut line)?;
            filter::unfilter(filter_type, &mut line, &previous, ihdr.filter_step())?;
            expand_line(ihdr, key, &line, &mut expanded);

            let row_start = (pass.y0 + py * pass.dy) as usize * stride;
            for (px, pixel) in expanded.chunks_exact(pixel_bytes).enumerate() {
                let x = pass.x0 as usize + px * pass.dx as usize;
                let start = row_start + x * pixel_bytes;
                image[start..start + pixel_bytes].copy_from_slice(pixel);
            }
            std::mem::swap(&mut line, &mut previous);
        }
    }
    Ok(image)
}
