//! GIF decoding. Only the first frame is decoded, composited onto the logical
//! screen.

use log::{debug, trace};
use weezl::{decode::Decoder as LzwDecoder, BitOrder, LzwStatus};

use crate::bytes::ByteReader;
use crate::error::{Error, Result};
use crate::image::{ColorLayout, ImageDecoder, ImageHeader, Palette, Scanline};
use crate::options::Limits;

const EXTENSION_INTRODUCER: u8 = 0x21;
const IMAGE_SEPARATOR: u8 = 0x2C;
const TRAILER: u8 = 0x3B;
const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;

const COLOR_TABLE_FLAG: u8 = 0x80;
const INTERLACE_FLAG: u8 = 0x40;

/// Frame rows in the order an interlaced frame stores them.
fn interlaced_rows(height: usize) -> impl Iterator<Item = usize> {
    [(0, 8), (4, 8), (2, 4), (1, 2)]
        .into_iter()
        .flat_map(move |(start, step)| (start..height).step_by(step))
}

fn color_table_len(flags: u8) -> usize {
    3 << ((flags & 0x07) + 1)
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    left: usize,
    top: usize,
    width: usize,
    height: usize,
    interlaced: bool,
    min_code_size: u8,
    // Index given to canvas pixels the frame does not cover
    fill: u8,
}

/// Used to decode the first frame of a GIF
pub struct GifDecoder<'data> {
    reader: ByteReader<'data>,
    limits: Limits,
    width: usize,
    height: usize,
    frame: Option<Frame>,
    canvas: Vec<u8>,
    next_row: usize,
}

impl<'data> GifDecoder<'data> {
    /// Reads a chain of data sub-blocks up to and including the terminator.
    fn read_sub_blocks(&mut self, out: &mut Vec<u8>) -> Result<()> {
        loop {
            let len = self.reader.read_u8()? as usize;
            if len == 0 {
                return Ok(());
            }
            out.extend_from_slice(self.reader.read_slice(len)?);
        }
    }

    fn decode_frame(&mut self, frame: &Frame) -> Result<Vec<u8>> {
        let mut compressed = Vec::new();
        self.read_sub_blocks(&mut compressed)?;
        // A trailer or another block has to follow the frame.
        self.reader.peek(1)?;

        let frame_len = frame.width * frame.height;
        let mut indices = vec![0u8; frame_len];
        let mut decoder = LzwDecoder::new(BitOrder::Lsb, frame.min_code_size);
        let mut input = compressed.as_slice();
        let mut written = 0;
        while written < frame_len {
            let result = decoder.decode_bytes(input, &mut indices[written..]);
            written += result.consumed_out;
            input = &input[result.consumed_in..];
            match result.status {
                Ok(LzwStatus::Ok) if result.consumed_in + result.consumed_out > 0 => {}
                Ok(_) => break,
                Err(_) => return Err(Error::CorruptData("invalid LZW code")),
            }
        }
        if written < frame_len {
            return Err(Error::CorruptData("LZW data ended before the frame was complete"));
        }
        trace!(
            "GIF: {} LZW bytes -> {} indices",
            compressed.len() - input.len(),
            written
        );

        let mut canvas = vec![frame.fill; self.width * self.height];
        let order: Vec<usize> = if frame.interlaced {
            interlaced_rows(frame.height).collect()
        } else {
            (0..frame.height).collect()
        };
        for (source, &frame_row) in indices.chunks_exact(frame.width).zip(&order) {
            let y = frame.top + frame_row;
            if y >= self.height || frame.left >= self.width {
                continue;
            }
            let visible = frame.width.min(self.width - frame.left);
            let start = y * self.width + frame.left;
            canvas[start..start + visible].copy_from_slice(&source[..visible]);
        }
        Ok(canvas)
    }
}

impl<'data> ImageDecoder<'data> for GifDecoder<'data> {
    fn new(data: &'data [u8], limits: Limits) -> Self {
        Self {
            reader: ByteReader::new(data),
            limits,
            width: 0,
            height: 0,
            frame: None,
            canvas: Vec::new(),
            next_row: 0,
        }
    }

    fn read_header(&mut self) -> Result<ImageHeader> {
        let signature = self.reader.read_slice(6)?;
        if signature != b"GIF87a" && signature != b"GIF89a" {
            return Err(Error::CorruptData("bad GIF signature"));
        }

        let width = self.reader.read_u16_le()? as u32;
        let height = self.reader.read_u16_le()? as u32;
        let screen_flags = self.reader.read_u8()?;
        let background = self.reader.read_u8()?;
        self.reader.skip(1)?; // pixel aspect ratio

        if width == 0 || height == 0 {
            return Err(Error::CorruptData("zero image dimension"));
        }
        self.limits.check(width, height, 1)?;

        let global_table = if screen_flags & COLOR_TABLE_FLAG != 0 {
            Some(self.reader.read_slice(color_table_len(screen_flags))?)
        } else {
            None
        };

        let mut transparent = None;
        loop {
            match self.reader.read_u8()? {
                EXTENSION_INTRODUCER => {
                    let label = self.reader.read_u8()?;
                    let mut data = Vec::new();
                    self.read_sub_blocks(&mut data)?;
                    trace!("GIF: extension {:#04X} ({} bytes)", label, data.len());
                    if label == GRAPHIC_CONTROL_LABEL {
                        if data.len() < 4 {
                            return Err(Error::CorruptData("short graphic control extension"));
                        }
                        transparent = (data[0] & 0x01 != 0).then_some(data[3]);
                    }
                }
                IMAGE_SEPARATOR => break,
                TRAILER => return Err(Error::CorruptData("GIF contains no image")),
                _ => return Err(Error::CorruptData("unknown GIF block")),
            }
        }

        let left = self.reader.read_u16_le()? as usize;
        let top = self.reader.read_u16_le()? as usize;
        let frame_width = self.reader.read_u16_le()? as u32;
        let frame_height = self.reader.read_u16_le()? as u32;
        let frame_flags = self.reader.read_u8()?;
        if frame_width == 0 || frame_height == 0 {
            return Err(Error::CorruptData("zero image dimension"));
        }
        self.limits.check(frame_width, frame_height, 1)?;

        let local_table = if frame_flags & COLOR_TABLE_FLAG != 0 {
            Some(self.reader.read_slice(color_table_len(frame_flags))?)
        } else {
            None
        };
        let table = local_table
            .or(global_table)
            .ok_or(Error::CorruptData("GIF frame has no color table"))?;

        let min_code_size = self.reader.read_u8()?;
        if !(2..=8).contains(&min_code_size) {
            return Err(Error::CorruptData("invalid LZW minimum code size"));
        }

        let mut palette = Palette::from_rgb(table);
        if let Some(index) = transparent {
            palette.set_alpha(index as usize, 0);
        }

        let frame = Frame {
            left,
            top,
            width: frame_width as usize,
            height: frame_height as usize,
            interlaced: frame_flags & INTERLACE_FLAG != 0,
            min_code_size,
            fill: transparent.unwrap_or(background),
        };
        debug!(
            "GIF: {}x{} screen, frame {}x{} at ({}, {}), interlaced {}, transparent {:?}",
            width, height, frame.width, frame.height, left, top, frame.interlaced, transparent
        );
        self.width = width as usize;
        self.height = height as usize;
        self.frame = Some(frame);

        Ok(ImageHeader {
            width,
            height,
            layout: ColorLayout::Indexed,
            bit_depth: 8,
            palette: Some(palette),
        })
    }

    fn read_row(&mut self) -> Result<Option<Scanline<'_>>> {
        let frame = self
            .frame
            .ok_or(Error::InternalError("read_row called before read_header"))?;
        if self.next_row >= self.height {
            return Ok(None);
        }
        if self.canvas.is_empty() {
            self.canvas = self.decode_frame(&frame)?;
        }

        let y = self.next_row;
        self.next_row += 1;
        Ok(Some(Scanline {
            y: y as u32,
            data: &self.canvas[y * self.width..(y + 1) * self.width],
        }))
    }
}
