//! Truevision TGA decoding: color-mapped, truecolor and grayscale images,
//! uncompressed or run-length encoded.

use log::debug;

use crate::bytes::ByteReader;
use crate::error::{Error, Result};
use crate::image::{ColorLayout, ImageDecoder, ImageHeader, Palette, Scanline};
use crate::options::Limits;

const HEADER_LEN: usize = 18;

const DESCRIPTOR_RIGHT_TO_LEFT: u8 = 0x10;
const DESCRIPTOR_TOP_DOWN: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageKind {
    ColorMapped,
    TrueColor,
    Gray,
}

#[derive(Debug, Clone, Copy)]
struct TgaInfo {
    width: u32,
    height: u32,
    rle: bool,
    bits_per_pixel: u8,
    top_down: bool,
    right_to_left: bool,
    layout: ColorLayout,
}

impl TgaInfo {
    fn pixel_bytes(&self) -> usize {
        (self.bits_per_pixel as usize).div_ceil(8)
    }
}

/// Converts one 15/16/24/32-bit BGR(A) value to RGBA. The attribute bit of
/// 16-bit values is not treated as alpha.
fn bgr_to_rgba(raw: &[u8]) -> [u8; 4] {
    match raw.len() {
        2 => {
            let value = u16::from_le_bytes([raw[0], raw[1]]);
            let scale = |c: u16| ((c & 0x1F) * 255 / 31) as u8;
            [scale(value >> 10), scale(value >> 5), scale(value), 255]
        }
        3 => [raw[2], raw[1], raw[0], 255],
        _ => [raw[2], raw[1], raw[0], raw[3]],
    }
}

/// Used to decode a TGA image
pub struct TgaDecoder<'data> {
    reader: ByteReader<'data>,
    limits: Limits,
    info: Option<TgaInfo>,
    next_row: u32,
    // RLE packet state carries over from one row to the next.
    packet_left: usize,
    packet_is_run: bool,
    run_pixel: &'data [u8],
    row: Vec<u8>,
}

impl<'data> TgaDecoder<'data> {
    fn next_pixel(&mut self, info: &TgaInfo) -> Result<&'data [u8]> {
        let len = info.pixel_bytes();
        if !info.rle {
            return self.reader.read_slice(len);
        }
        if self.packet_left == 0 {
            let packet = self.reader.read_u8()?;
            self.packet_left = (packet & 0x7F) as usize + 1;
            self.packet_is_run = packet & 0x80 != 0;
            if self.packet_is_run {
                self.run_pixel = self.reader.read_slice(len)?;
            }
        }
        self.packet_left -= 1;
        if self.packet_is_run {
            Ok(self.run_pixel)
        } else {
            self.reader.read_slice(len)
        }
    }

    fn read_file_row(&mut self, info: &TgaInfo) -> Result<()> {
        let width = info.width as usize;
        let samples = info.layout.samples_per_pixel();
        for x in 0..width {
            let raw = self.next_pixel(info)?;
            let column = if info.right_to_left { width - 1 - x } else { x };
            let out = &mut self.row[column * samples..(column + 1) * samples];
            match info.layout {
                ColorLayout::Rgb => out.copy_from_slice(&bgr_to_rgba(raw)[..3]),
                ColorLayout::Rgba => out.copy_from_slice(&bgr_to_rgba(raw)),
                // index, gray, or gray + alpha
                _ => out.copy_from_slice(raw),
            }
        }
        Ok(())
    }
}

impl<'data> ImageDecoder<'data> for TgaDecoder<'data> {
    fn new(data: &'data [u8], limits: Limits) -> Self {
        Self {
            reader: ByteReader::new(data),
            limits,
            info: None,
            next_row: 0,
            packet_left: 0,
            packet_is_run: false,
            run_pixel: &[],
            row: Vec::new(),
        }
    }

    fn read_header(&mut self) -> Result<ImageHeader> {
        let header = self.reader.read_slice(HEADER_LEN)?;
        let id_len = header[0] as usize;
        let colormap_type = header[1];
        let image_type = header[2];
        let colormap_first = u16::from_le_bytes([header[3], header[4]]) as usize;
        let colormap_len = u16::from_le_bytes([header[5], header[6]]) as usize;
        let colormap_bits = header[7];
        let width = u16::from_le_bytes([header[12], header[13]]) as u32;
        let height = u16::from_le_bytes([header[14], header[15]]) as u32;
        let bits_per_pixel = header[16];
        let descriptor = header[17];

        if colormap_type > 1 {
            return Err(Error::CorruptData("invalid TGA color map type"));
        }
        let (kind, rle) = match image_type {
            1 => (ImageKind::ColorMapped, false),
            2 => (ImageKind::TrueColor, false),
            3 => (ImageKind::Gray, false),
            9 => (ImageKind::ColorMapped, true),
            10 => (ImageKind::TrueColor, true),
            11 => (ImageKind::Gray, true),
            32 | 33 => return Err(Error::UnsupportedFeature("Huffman-compressed TGA")),
            _ => return Err(Error::CorruptData("invalid TGA image type")),
        };
        if width == 0 || height == 0 {
            return Err(Error::CorruptData("zero image dimension"));
        }

        let layout = match (kind, bits_per_pixel) {
            (ImageKind::ColorMapped, 8) => ColorLayout::Indexed,
            (ImageKind::ColorMapped, 16) => {
                return Err(Error::UnsupportedFeature("16-bit TGA color map indices"))
            }
            (ImageKind::TrueColor, 15 | 16 | 24) => ColorLayout::Rgb,
            (ImageKind::TrueColor, 32) => ColorLayout::Rgba,
            (ImageKind::Gray, 8) => ColorLayout::Gray,
            (ImageKind::Gray, 16) => ColorLayout::GrayAlpha,
            _ => return Err(Error::CorruptData("invalid TGA pixel depth")),
        };
        self.limits
            .check(width, height, layout.samples_per_pixel())?;

        self.reader.skip(id_len)?;

        let mut palette = None;
        if colormap_type == 1 {
            if !matches!(colormap_bits, 15 | 16 | 24 | 32) {
                return Err(Error::CorruptData("invalid TGA color map entry size"));
            }
            let entry_len = (colormap_bits as usize).div_ceil(8);
            let entries = self.reader.read_slice(colormap_len * entry_len)?;
            if kind == ImageKind::ColorMapped {
                // Stored entries start at palette index `colormap_first`.
                let mut colors = vec![[0, 0, 0, 255]; colormap_first.min(256)];
                colors.extend(entries.chunks_exact(entry_len).map(bgr_to_rgba));
                palette = Some(Palette::new(colors));
            }
        } else if kind == ImageKind::ColorMapped {
            return Err(Error::CorruptData("color-mapped TGA without a color map"));
        }

        let info = TgaInfo {
            width,
            height,
            rle,
            bits_per_pixel,
            top_down: descriptor & DESCRIPTOR_TOP_DOWN != 0,
            right_to_left: descriptor & DESCRIPTOR_RIGHT_TO_LEFT != 0,
            layout,
        };
        debug!(
            "TGA: {}x{} {:?} {} bpp (rle {}, top-down {})",
            width, height, kind, bits_per_pixel, rle, info.top_down
        );
        self.row = vec![0; width as usize * layout.samples_per_pixel()];
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
        self.read_file_row(&info)?;
        self.next_row += 1;

        let y = if info.top_down {
            file_row
        } else {
            info.height - 1 - file_row
        };
        Ok(Some(Scanline { y, data: &self.row }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tga(image_type: u8, width: u16, height: u16, bpp: u8, descriptor: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![0, 0, image_type, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        out.extend_from_slice(&[bpp, descriptor]);
        out.extend_from_slice(body);
        out
    }

    fn decode(data: &[u8]) -> Result<(ImageHeader, Vec<Vec<u8>>)> {
        let mut decoder = TgaDecoder::new(data, Limits::default());
        let header = decoder.read_header()?;
        let mut rows = vec![Vec::new(); header.height as usize];
        while let Some(row) = decoder.read_row()? {
            rows[row.y as usize] = row.data.to_vec();
        }
        Ok((header, rows))
    }

    #[test]
    fn bottom_up_bgr() {
        #[rustfmt::skip]
        let body = [
            0, 0, 255,  0, 255, 0,  // bottom
            255, 0, 0,  1, 2, 3,    // top
        ];
        let (header, rows) = decode(&tga(2, 2, 2, 24, 0, &body)).unwrap();
        assert_eq!(header.layout, ColorLayout::Rgb);
        assert_eq!(rows[0], [0, 0, 255, 3, 2, 1]);
        assert_eq!(rows[1], [255, 0, 0, 0, 255, 0]);
    }

    #[test]
    fn top_down_right_to_left_gray() {
        let body = [1, 2, 3, 4];
        let (header, rows) = decode(&tga(3, 2, 2, 8, 0x30, &body)).unwrap();
        assert_eq!(header.layout, ColorLayout::Gray);
        assert_eq!(rows, [vec![2, 1], vec![4, 3]]);
    }

    #[test]
    fn gray_alpha() {
        let (header, rows) = decode(&tga(3, 1, 1, 16, 0x20, &[90, 7])).unwrap();
        assert_eq!(header.layout, ColorLayout::GrayAlpha);
        assert_eq!(rows[0], [90, 7]);
    }

    #[test]
    fn rle_packets_span_rows() {
        #[rustfmt::skip]
        let body = [
            0x82, 1, 2, 3, 4,   // run of 3
            0x00, 5, 6, 7, 8,   // one raw pixel
        ];
        let (header, rows) = decode(&tga(10, 2, 2, 32, 0x20, &body)).unwrap();
        assert_eq!(header.layout, ColorLayout::Rgba);
        assert_eq!(rows[0], [3, 2, 1, 4, 3, 2, 1, 4]);
        assert_eq!(rows[1], [3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn color_map_with_offset() {
        let mut data = vec![0, 1, 9, 2, 0, 2, 0, 24, 0, 0, 0, 0, 3, 0, 1, 0, 8, 0x20];
        data.extend_from_slice(&[255, 0, 0, 0, 0, 255]); // entries 2 and 3
        data.extend_from_slice(&[0x81, 3, 0x00, 2]);
        let (header, rows) = decode(&data).unwrap();
        let palette = header.palette.unwrap();
        assert_eq!(palette.get(2), [0, 0, 255, 255]);
        assert_eq!(palette.get(3), [255, 0, 0, 255]);
        assert_eq!(rows[0], [3, 3, 2]);
    }

    #[test]
    fn fifteen_bit_color() {
        // 0x7C00 is red, 0x03E0 green
        let body = [0x00, 0x7C, 0xE0, 0x03];
        let (_, rows) = decode(&tga(2, 2, 1, 15, 0, &body)).unwrap();
        assert_eq!(rows[0], [255, 0, 0, 0, 255, 0]);
    }

    #[test]
    fn truncated_run() {
        let data = tga(10, 4, 1, 24, 0, &[0x83, 1, 2]);
        assert_eq!(decode(&data).unwrap_err(), Error::TruncatedInput);
    }

    #[test]
    fn colormapped_without_map() {
        let data = tga(1, 1, 1, 8, 0, &[0]);
        assert_eq!(
            decode(&data).unwrap_err(),
            Error::CorruptData("color-mapped TGA without a color map")
        );
    }
}
