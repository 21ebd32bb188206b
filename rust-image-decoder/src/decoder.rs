//! Format dispatch and the row-driving state machine shared by every decode
//! call.

use byteorder::BigEndian;
use log::{debug, trace};

use crate::bmp::BmpDecoder;
use crate::error::{Error, Result};
use crate::gif::GifDecoder;
use crate::image::{Image, ImageDecoder, ImageHeader, Scanline};
use crate::jpeg::JpegDecoder;
use crate::normalize::Normalizer;
use crate::options::{DecodeOptions, Limits};
use crate::png::PngDecoder;
use crate::pnm::PnmDecoder;
use crate::psd::PsdDecoder;
use crate::sniff::{sniff, ImageFormat};
use crate::tga::TgaDecoder;

/// One decoder per supported format.
enum FormatDecoder<'data> {
    Png(PngDecoder<'data>),
    Jpeg(JpegDecoder<'data>),
    Gif(GifDecoder<'data>),
    Bmp(BmpDecoder<'data>),
    Pnm(PnmDecoder<'data>),
    Tga(TgaDecoder<'data>),
    Psd(PsdDecoder<'data>),
}

impl<'data> FormatDecoder<'data> {
    fn new(format: ImageFormat, data: &'data [u8], limits: Limits) -> Self {
        match format {
            ImageFormat::Png => Self::Png(PngDecoder::new(data, limits)),
            ImageFormat::Jpeg => Self::Jpeg(JpegDecoder::new(data, limits)),
            ImageFormat::Gif => Self::Gif(GifDecoder::new(data, limits)),
            ImageFormat::Bmp => Self::Bmp(BmpDecoder::new(data, limits)),
            ImageFormat::Pnm => Self::Pnm(PnmDecoder::new(data, limits)),
            ImageFormat::Tga => Self::Tga(TgaDecoder::new(data, limits)),
            ImageFormat::Psd => Self::Psd(PsdDecoder::new(data, limits)),
        }
    }

    fn read_header(&mut self) -> Result<ImageHeader> {
        match self {
            Self::Png(decoder) => decoder.read_header(),
            Self::Jpeg(decoder) => decoder.read_header(),
            Self::Gif(decoder) => decoder.read_header(),
            Self::Bmp(decoder) => decoder.read_header(),
            Self::Pnm(decoder) => decoder.read_header(),
            Self::Tga(decoder) => decoder.read_header(),
            Self::Psd(decoder) => decoder.read_header(),
        }
    }

    fn read_row(&mut self) -> Result<Option<Scanline<'_>>> {
        match self {
            Self::Png(decoder) => decoder.read_row(),
            Self::Jpeg(decoder) => decoder.read_row(),
            Self::Gif(decoder) => decoder.read_row(),
            Self::Bmp(decoder) => decoder.read_row(),
            Self::Pnm(decoder) => decoder.read_row(),
            Self::Tga(decoder) => decoder.read_row(),
            Self::Psd(decoder) => decoder.read_row(),
        }
    }
}

/// Where a [`Decoder`] is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// The header has not been parsed yet
    ReadingHeader,
    /// Rows are being produced
    ReadingData,
    /// Every row was produced
    Done,
    /// An error occurred; the decoder can't be used any more
    Failed,
}

/// Decodes one in-memory image of any supported format.
///
/// ```
/// use rust_image_decoder::{Decoder, DecoderState, Limits};
///
/// let ppm = b"P6 1 1 255\n\xFF\x00\x00";
/// let mut decoder = Decoder::new(ppm, Limits::default()).unwrap();
/// assert_eq!(decoder.read_header().unwrap().width, 1);
/// assert_eq!(decoder.next_row().unwrap().unwrap().data, &[255, 0, 0]);
/// assert!(decoder.next_row().unwrap().is_none());
/// assert_eq!(decoder.state(), DecoderState::Done);
/// ```
pub struct Decoder<'data> {
    format: ImageFormat,
    inner: FormatDecoder<'data>,
    state: DecoderState,
    header: Option<ImageHeader>,
}

impl<'data> Decoder<'data> {
    /// Identifies the format of `data` and prepares a decoder for it.
    pub fn new(data: &'data [u8], limits: Limits) -> Result<Self> {
        let format = sniff(data)?;
        debug!("sniffed {:?} ({} bytes)", format, data.len());
        Ok(Self {
            format,
            inner: FormatDecoder::new(format, data, limits),
            state: DecoderState::ReadingHeader,
            header: None,
        })
    }

    /// The detected format
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// The current state
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Parses the header on the first call and returns it on every later one.
    pub fn read_header(&mut self) -> Result<&ImageHeader> {
        match self.state {
            DecoderState::ReadingHeader => match self.inner.read_header() {
                Ok(header) => {
                    self.state = DecoderState::ReadingData;
                    Ok(self.header.insert(header))
                }
                Err(err) => {
                    self.state = DecoderState::Failed;
                    Err(err)
                }
            },
            DecoderState::Failed => Err(Error::InternalError("decoder already failed")),
            _ => self
                .header
                .as_ref()
                .ok_or(Error::InternalError("header missing after it was read")),
        }
    }

    /// Produces the next native row, or `None` once the image is complete.
    pub fn next_row(&mut self) -> Result<Option<Scanline<'_>>> {
        match self.state {
            DecoderState::ReadingData => {}
            DecoderState::Done => return Ok(None),
            DecoderState::ReadingHeader => {
                return Err(Error::InternalError("rows requested before the header"))
            }
            DecoderState::Failed => return Err(Error::InternalError("decoder already failed")),
        }
        match self.inner.read_row() {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.state = DecoderState::Done;
                Ok(None)
            }
            Err(err) => {
                self.state = DecoderState::Failed;
                Err(err)
            }
        }
    }

    /// Decodes the whole image into one buffer according to `options`.
    pub fn decode(mut self, options: &DecodeOptions) -> Result<Image> {
        let header = self.read_header()?.clone();
        let channels = match options.channels {
            0 => header.native_channels(),
            1..=4 => options.channels,
            requested => return Err(Error::UnsupportedConversion { requested }),
        };
        let bit_depth = if header.bit_depth == 16 && options.keep_16bit {
            16
        } else {
            8
        };
        let normalizer = Normalizer::<BigEndian>::new(
            header.layout,
            header.palette.as_ref(),
            header.bit_depth,
            bit_depth,
            channels,
        )?;

        let (width, height) = (header.width, header.height);
        let pixel_bytes = channels as usize * (bit_depth as usize / 8);
        let len = options.limits.check(width, height, pixel_bytes)?;
        let stride = width as usize * pixel_bytes;
        let mut pixels = vec![0u8; len];
        let mut produced = vec![false; height as usize];
        let mut rows = 0u32;

        let flip = options.flip_vertically;
        while let Some(row) = self.next_row()? {
            if row.y >= height || produced[row.y as usize] {
                return Err(Error::InternalError("decoder produced a row twice or out of range"));
            }
            produced[row.y as usize] = true;
            rows += 1;

            let y = (if flip { height - 1 - row.y } else { row.y }) as usize;
            normalizer.convert_row(row.data, &mut pixels[y * stride..(y + 1) * stride])?;
        }
        if rows != height {
            return Err(Error::InternalError("decoder produced too few rows"));
        }
        trace!("normalized {} rows to {} channels", rows, channels);

        Ok(Image {
            width,
            height,
            channels,
            bit_depth,
            pixels,
        })
    }
}
