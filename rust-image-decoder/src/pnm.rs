//! Binary PGM (`P5`) and PPM (`P6`) decoding.

use log::debug;

use crate::bytes::ByteReader;
use crate::error::{Error, Result};
use crate::image::{ColorLayout, ImageDecoder, ImageHeader, Scanline};
use crate::options::Limits;

#[derive(Debug, Clone, Copy)]
struct PnmInfo {
    width: u32,
    height: u32,
    layout: ColorLayout,
    maxval: u32,
    bit_depth: u8,
}

impl PnmInfo {
    fn row_bytes(&self) -> usize {
        self.width as usize * self.layout.samples_per_pixel() * (self.bit_depth as usize / 8)
    }
}

/// Used to decode a binary PGM or PPM image
pub struct PnmDecoder<'data> {
    reader: ByteReader<'data>,
    limits: Limits,
    info: Option<PnmInfo>,
    next_row: u32,
    row: Vec<u8>,
}

impl<'data> PnmDecoder<'data> {
    /// Skips whitespace and `#` comments between header fields.
    fn skip_separators(&mut self) -> Result<()> {
        loop {
            let c = self.reader.peek(1)?[0];
            if c.is_ascii_whitespace() {
                self.reader.skip(1)?;
            } else if c == b'#' {
                while self.reader.read_u8()? != b'\n' {}
            } else {
                return Ok(());
            }
        }
    }

    fn read_number(&mut self) -> Result<u32> {
        self.skip_separators()?;
        let mut value: u32 = 0;
        let mut digits = 0;
        loop {
            let c = self.reader.peek(1)?[0];
            if !c.is_ascii_digit() {
                break;
            }
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((c - b'0') as u32))
                .ok_or(Error::CorruptData("PNM header value out of range"))?;
            digits += 1;
            self.reader.skip(1)?;
        }
        if digits == 0 {
            return Err(Error::CorruptData("expected a number in the PNM header"));
        }
        Ok(value)
    }

    fn rescale_row(&mut self, info: &PnmInfo, src: &[u8]) {
        match info.bit_depth {
            8 => {
                for (out, &sample) in self.row.iter_mut().zip(src) {
                    *out = rescale(sample as u32, info.maxval, 255) as u8;
                }
            }
            _ => {
                for (out, sample) in self.row.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
                    let value = u16::from_be_bytes([sample[0], sample[1]]) as u32;
                    let scaled = rescale(value, info.maxval, 65535) as u16;
                    out.copy_from_slice(&scaled.to_be_bytes());
                }
            }
        }
    }
}

/// Maps `0..=maxval` onto `0..=full`. Out-of-range samples saturate.
fn rescale(sample: u32, maxval: u32, full: u32) -> u32 {
    if maxval == full {
        return sample;
    }
    (sample.min(maxval) * full + maxval / 2) / maxval
}

impl<'data> ImageDecoder<'data> for PnmDecoder<'data> {
    fn new(data: &'data [u8], limits: Limits) -> Self {
        Self {
            reader: ByteReader::new(data),
            limits,
            info: None,
            next_row: 0,
            row: Vec::new(),
        }
    }

    fn read_header(&mut self) -> Result<ImageHeader> {
        let layout = match self.reader.read_slice(2)? {
            b"P5" => ColorLayout::Gray,
            b"P6" => ColorLayout::Rgb,
            _ => return Err(Error::CorruptData("bad PNM magic number")),
        };
        let width = self.read_number()?;
        let height = self.read_number()?;
        let maxval = self.read_number()?;
        // exactly one whitespace byte before the raster
        if !self.reader.read_u8()?.is_ascii_whitespace() {
            return Err(Error::CorruptData("missing whitespace after PNM maxval"));
        }

        if width == 0 || height == 0 {
            return Err(Error::CorruptData("zero image dimension"));
        }
        if !(1..=65535).contains(&maxval) {
            return Err(Error::CorruptData("PNM maxval out of range"));
        }
        let bit_depth = if maxval > 255 { 16 } else { 8 };
        let bytes_per_pixel = layout.samples_per_pixel() * (bit_depth as usize / 8);
        self.limits.check(width, height, bytes_per_pixel)?;

        let info = PnmInfo {
            width,
            height,
            layout,
            maxval,
            bit_depth,
        };
        debug!(
            "PNM: {}x{} {:?} maxval {} ({}-bit)",
            width, height, layout, maxval, bit_depth
        );
        self.row = vec![0; info.row_bytes()];
        self.info = Some(info);

        Ok(ImageHeader {
            width,
            height,
            layout,
            bit_depth,
            palette: None,
        })
    }

    fn read_row(&mut self) -> Result<Option<Scanline<'_>>> {
        let info = self
            .info
            .ok_or(Error::InternalError("read_row called before read_header"))?;
        if self.next_row >= info.height {
            return Ok(None);
        }
        let src = self.reader.read_slice(info.row_bytes())?;
        self.rescale_row(&info, src);

        let y = self.next_row;
        self.next_row += 1;
        Ok(Some(Scanline { y, data: &self.row }))
    }
}
