//! Photoshop document decoding. Only the flattened composite image stored at
//! the end of the file is read; layers are skipped.

use std::borrow::Cow;

use log::debug;

use crate::bytes::ByteReader;
use crate::error::{Error, Result};
use crate::image::{ColorLayout, ImageDecoder, ImageHeader, Scanline};
use crate::options::Limits;

const SIGNATURE: &[u8] = b"8BPS";
const MAX_CHANNELS: u16 = 56;

const MODE_GRAYSCALE: u16 = 1;
const MODE_RGB: u16 = 3;

#[derive(Debug, Clone, Copy)]
struct PsdInfo {
    width: u32,
    height: u32,
    /// Channels stored in the file, possibly more than `layout` uses
    channels: usize,
    bit_depth: u8,
    layout: ColorLayout,
    packbits: bool,
}

impl PsdInfo {
    fn sample_bytes(&self) -> usize {
        self.bit_depth as usize / 8
    }

    fn row_len(&self) -> usize {
        self.width as usize * self.layout.samples_per_pixel() * self.sample_bytes()
    }

    fn plane_row_len(&self) -> usize {
        self.width as usize * self.sample_bytes()
    }
}

/// Expands one PackBits-compressed row into `out`, which it must fill exactly.
fn unpack_bits(src: &[u8], out: &mut [u8]) -> Result<()> {
    let short = |_| Error::CorruptData("PackBits row is too short");
    let mut reader = ByteReader::new(src);
    let mut filled = 0;
    while filled < out.len() {
        let header = reader.read_u8().map_err(short)?;
        let len = match header {
            0..=127 => header as usize + 1,
            128 => continue,
            _ => 257 - header as usize,
        };
        let dest = out
            .get_mut(filled..filled + len)
            .ok_or(Error::CorruptData("PackBits run overflows the row"))?;
        if header < 128 {
            dest.copy_from_slice(reader.read_slice(len).map_err(short)?);
        } else {
            dest.fill(reader.read_u8().map_err(short)?);
        }
        filled += len;
    }
    Ok(())
}

/// The composite is flattened against white. Undoes that for partially
/// transparent pixels.
fn remove_white_matte(pixels: &mut [u8], bit_depth: u8) {
    let unmatte = |value: u64, alpha: u64, max: u64| {
        max.saturating_sub(((max - value) * max + alpha / 2) / alpha)
    };
    if bit_depth == 8 {
        for pixel in pixels.chunks_exact_mut(4) {
            let alpha = pixel[3] as u64;
            if alpha != 0 && alpha != 255 {
                for sample in &mut pixel[..3] {
                    *sample = unmatte(*sample as u64, alpha, 255) as u8;
                }
            }
        }
    } else {
        for pixel in pixels.chunks_exact_mut(8) {
            let alpha = u16::from_be_bytes([pixel[6], pixel[7]]) as u64;
            if alpha != 0 && alpha != 0xFFFF {
                for sample in pixel[..6].chunks_exact_mut(2) {
                    let value = u16::from_be_bytes([sample[0], sample[1]]) as u64;
                    let value = unmatte(value, alpha, 0xFFFF) as u16;
                    sample.copy_from_slice(&value.to_be_bytes());
                }
            }
        }
    }
}

/// Used to decode a PSD image
pub struct PsdDecoder<'data> {
    reader: ByteReader<'data>,
    limits: Limits,
    info: Option<PsdInfo>,
    next_row: u32,
    pixels: Option<Vec<u8>>,
}

impl<'data> PsdDecoder<'data> {
    /// Reads every plane the layout uses. Uncompressed planes are borrowed
    /// from the input.
    fn read_planes(&mut self, info: &PsdInfo) -> Result<Vec<Cow<'data, [u8]>>> {
        let height = info.height as usize;
        let used = info.layout.samples_per_pixel();
        let plane_len = info.plane_row_len() * height;

        if !info.packbits {
            return (0..used)
                .map(|_| self.reader.read_slice(plane_len).map(Cow::Borrowed))
                .collect();
        }

        // byte counts for every row of every channel come first
        let counts = self.reader.read_slice(info.channels * height * 2)?;
        let mut planes = Vec::with_capacity(used);
        let mut row = vec![0u8; info.plane_row_len()];
        for channel in 0..used {
            let mut plane = Vec::new();
            for y in 0..height {
                let at = (channel * height + y) * 2;
                let count = u16::from_be_bytes([counts[at], counts[at + 1]]) as usize;
                unpack_bits(self.reader.read_slice(count)?, &mut row)?;
                plane.extend_from_slice(&row);
            }
            planes.push(Cow::Owned(plane));
        }
        Ok(planes)
    }

    fn decode_all(&mut self, info: &PsdInfo) -> Result<Vec<u8>> {
        let planes = self.read_planes(info)?;
        let used = planes.len();
        let sample = info.sample_bytes();

        let mut pixels = vec![0u8; info.row_len() * info.height as usize];
        for (channel, plane) in planes.iter().enumerate() {
            for (i, value) in plane.chunks_exact(sample).enumerate() {
                let at = (i * used + channel) * sample;
                pixels[at..at + sample].copy_from_slice(value);
            }
        }

        if info.layout == ColorLayout::Rgba {
            remove_white_matte(&mut pixels, info.bit_depth);
        }
        Ok(pixels)
    }
}

impl<'data> ImageDecoder<'data> for PsdDecoder<'data> {
    fn new(data: &'data [u8], limits: Limits) -> Self {
        Self {
            reader: ByteReader::new(data),
            limits,
            info: None,
            next_row: 0,
            pixels: None,
        }
    }

    fn read_header(&mut self) -> Result<ImageHeader> {
        if self.reader.read_slice(SIGNATURE.len())? != SIGNATURE {
            return Err(Error::CorruptData("missing PSD signature"));
        }
        match self.reader.read_u16_be()? {
            1 => {}
            2 => return Err(Error::UnsupportedFeature("PSB large documents")),
            _ => return Err(Error::CorruptData("invalid PSD version")),
        }
        self.reader.skip(6)?;

        let channels = self.reader.read_u16_be()?;
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(Error::CorruptData("invalid PSD channel count"));
        }
        let height = self.reader.read_u32_be()?;
        let width = self.reader.read_u32_be()?;
        if width == 0 || height == 0 {
            return Err(Error::CorruptData("zero image dimension"));
        }
        let bit_depth = match self.reader.read_u16_be()? {
            8 => 8,
            16 => 16,
            1 | 32 => return Err(Error::UnsupportedFeature("PSD bit depth")),
            _ => return Err(Error::CorruptData("invalid PSD bit depth")),
        };
        let layout = match (self.reader.read_u16_be()?, channels) {
            (MODE_GRAYSCALE, 1) => ColorLayout::Gray,
            (MODE_GRAYSCALE, _) => ColorLayout::GrayAlpha,
            (MODE_RGB, 1 | 2) => return Err(Error::CorruptData("too few channels for RGB")),
            (MODE_RGB, 3) => ColorLayout::Rgb,
            (MODE_RGB, _) => ColorLayout::Rgba,
            // bitmap, indexed, CMYK, multichannel, duotone, Lab
            (0 | 2 | 4 | 7 | 8 | 9, _) => {
                return Err(Error::UnsupportedFeature("PSD color mode"))
            }
            _ => return Err(Error::CorruptData("invalid PSD color mode")),
        };
        self.limits
            .check(width, height, layout.samples_per_pixel() * bit_depth as usize / 8)?;

        // color mode data, image resources, layer and mask information
        for _ in 0..3 {
            let len = self.reader.read_u32_be()? as usize;
            self.reader.skip(len)?;
        }

        let packbits = match self.reader.read_u16_be()? {
            0 => false,
            1 => true,
            2 | 3 => return Err(Error::UnsupportedFeature("ZIP-compressed PSD")),
            _ => return Err(Error::CorruptData("invalid PSD compression")),
        };

        debug!(
            "PSD {}x{}, {} channels as {:?}, {}-bit, packbits: {}",
            width, height, channels, layout, bit_depth, packbits
        );

        self.info = Some(PsdInfo {
            width,
            height,
            channels: channels as usize,
            bit_depth,
            layout,
            packbits,
        });
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
        let y = self.next_row;
        self.next_row += 1;

        if self.pixels.is_none() {
            self.pixels = Some(self.decode_all(&info)?);
        }
        let row_len = info.row_len();
        let start = y as usize * row_len;
        let data = self
            .pixels
            .as_deref()
            .and_then(|pixels| pixels.get(start..start + row_len))
            .ok_or(Error::InternalError("decoded PSD is too small"))?;
        Ok(Some(Scanline { y, data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn psd(channels: u16, width: u32, height: u32, depth: u16, mode: u16, compression: u16, body: &[u8]) -> Vec<u8> {
        let mut out = b"8BPS\x00\x01\0\0\0\0\0\0".to_vec();
        out.extend_from_slice(&channels.to_be_bytes());
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(&width.to_be_bytes());
        out.extend_from_slice(&depth.to_be_bytes());
        out.extend_from_slice(&mode.to_be_bytes());
        // empty color mode data, a 4-byte resource section, no layers
        out.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 4, b'8', b'B', b'I', b'M', 0, 0, 0, 0]);
        out.extend_from_slice(&compression.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn decode(data: &[u8]) -> Result<(ImageHeader, Vec<Vec<u8>>)> {
        let mut decoder = PsdDecoder::new(data, Limits::default());
        let header = decoder.read_header()?;
        let mut rows = Vec::new();
        while let Some(row) = decoder.read_row()? {
            assert_eq!(row.y as usize, rows.len());
            rows.push(row.data.to_vec());
        }
        Ok((header, rows))
    }

    #[test]
    fn raw_rgb_planes_are_interleaved() {
        #[rustfmt::skip]
        let planes = [
            10, 20, 11, 21, // red
            30, 40, 31, 41, // green
            50, 60, 51, 61, // blue
        ];
        let (header, rows) = decode(&psd(3, 2, 2, 8, MODE_RGB, 0, &planes)).unwrap();
        assert_eq!(header.layout, ColorLayout::Rgb);
        assert_eq!(rows[0], [10, 30, 50, 20, 40, 60]);
        assert_eq!(rows[1], [11, 31, 51, 21, 41, 61]);
    }

    #[test]
    fn packbits_rgba() {
        #[rustfmt::skip]
        let body = [
            0, 2, 0, 5, 0, 2, 0, 2, // row byte counts
            0xFE, 9,                // red: run of three
            1, 7, 8, 0, 9,          // green: two literals, then one
            0xFE, 0,                // blue
            0xFE, 255,              // alpha
        ];
        let (header, rows) = decode(&psd(4, 3, 1, 8, MODE_RGB, 1, &body)).unwrap();
        assert_eq!(header.layout, ColorLayout::Rgba);
        assert_eq!(rows[0], [9, 7, 0, 255, 9, 8, 0, 255, 9, 9, 0, 255]);
    }

    #[test]
    fn gray_16bit_with_extra_channel() {
        // the second channel becomes alpha, the third is ignored
        #[rustfmt::skip]
        let planes = [
            0x12, 0x34, 0xAB, 0xCD,
            0xFF, 0xFF, 0x80, 0x00,
            0x01, 0x01, 0x01, 0x01,
        ];
        let (header, rows) = decode(&psd(3, 1, 2, 16, MODE_GRAYSCALE, 0, &planes)).unwrap();
        assert_eq!((header.layout, header.bit_depth), (ColorLayout::GrayAlpha, 16));
        assert_eq!(rows, [vec![0x12, 0x34, 0xFF, 0xFF], vec![0xAB, 0xCD, 0x80, 0x00]]);
    }

    #[test]
    fn white_matte_is_removed() {
        let mut pixels = [200, 255, 0, 128, 200, 255, 0, 0, 1, 2, 3, 255];
        remove_white_matte(&mut pixels, 8);
        // 255 - round(55 * 255 / 128) = 145; 255 - 508 clamps to 0
        assert_eq!(pixels, [145, 255, 0, 128, 200, 255, 0, 0, 1, 2, 3, 255]);

        let mut wide = [0xFF, 0xFF, 0x80, 0x00, 0, 0, 0x80, 0x00];
        remove_white_matte(&mut wide, 16);
        assert_eq!(&wide[..2], &[0xFF, 0xFF]);
        assert_eq!(&wide[4..], &[0, 0, 0x80, 0x00]);
    }

    #[test]
    fn unpack_bits_edge_cases() {
        let mut out = [0u8; 5];
        unpack_bits(&[0x80, 0xFE, 7, 1, 9, 8], &mut out).unwrap();
        assert_eq!(out, [7, 7, 7, 9, 8]);
        assert_eq!(
            unpack_bits(&[0xFB, 1], &mut out),
            Err(Error::CorruptData("PackBits run overflows the row"))
        );
        assert_eq!(
            unpack_bits(&[2, 1, 2], &mut out),
            Err(Error::CorruptData("PackBits row is too short"))
        );
    }

    #[test]
    fn unsupported_variants() {
        let mut psb = psd(3, 1, 1, 8, MODE_RGB, 0, &[1, 2, 3]);
        psb[5] = 2;
        assert_eq!(decode(&psb).unwrap_err(), Error::UnsupportedFeature("PSB large documents"));
        assert_eq!(
            decode(&psd(4, 1, 1, 8, 4, 0, &[0; 4])).unwrap_err(),
            Error::UnsupportedFeature("PSD color mode")
        );
        assert_eq!(
            decode(&psd(3, 1, 1, 8, MODE_RGB, 2, &[])).unwrap_err(),
            Error::UnsupportedFeature("ZIP-compressed PSD")
        );
        assert_eq!(
            decode(&psd(3, 1, 1, 32, MODE_RGB, 0, &[])).unwrap_err(),
            Error::UnsupportedFeature("PSD bit depth")
        );
    }

    #[test]
    fn short_planes_are_truncation() {
        let data = psd(3, 2, 1, 8, MODE_RGB, 0, &[1, 2, 3, 4, 5]);
        assert_eq!(decode(&data).unwrap_err(), Error::TruncatedInput);
        let data = psd(1, 2, 1, 8, MODE_GRAYSCALE, 1, &[0, 3, 0xFF]);
        assert_eq!(decode(&data).unwrap_err(), Error::TruncatedInput);
    }
}
