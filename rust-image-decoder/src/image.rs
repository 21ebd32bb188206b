use crate::error::Result;
use crate::options::Limits;

/// A decoded image: row-major, channel-interleaved samples.
///
/// `pixels.len()` is always `width * height * channels * bit_depth / 8`.
/// 16-bit samples are stored in native byte order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// The number of color channels in the image. Ex. RGBA = 4
    pub channels: u8,
    /// Bits per sample, 8 or 16
    pub bit_depth: u8,
    /// The raw bitmap data
    pub pixels: Vec<u8>,
}

impl Image {
    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.channels as usize * (self.bit_depth as usize / 8)
    }

    /// Returns row `y`, or None if it is out of range.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.stride();
        let start = y as usize * stride;
        self.pixels.get(start..start + stride)
    }

    /// Converts to a different channel count with the same rules the decoder
    /// applies. Converting to the current count returns the image unchanged.
    pub fn convert(self, channels: u8) -> Result<Image> {
        crate::normalize::convert_image(self, channels)
    }
}

/// How a decoder lays out the samples of one pixel before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorLayout {
    /// Luma only
    Gray,
    /// Luma and alpha
    GrayAlpha,
    /// Red, green, blue
    Rgb,
    /// Red, green, blue, alpha
    Rgba,
    /// One palette index per pixel
    Indexed,
    /// JPEG luma and chroma
    YCbCr,
    /// Adobe (inverted) cyan, magenta, yellow, black
    Cmyk,
    /// Adobe YCbCr plus inverted black
    Ycck,
}

impl ColorLayout {
    /// Samples stored per pixel in a native scanline.
    pub fn samples_per_pixel(self) -> usize {
        match self {
            ColorLayout::Gray | ColorLayout::Indexed => 1,
            ColorLayout::GrayAlpha => 2,
            ColorLayout::Rgb | ColorLayout::YCbCr => 3,
            ColorLayout::Rgba | ColorLayout::Cmyk | ColorLayout::Ycck => 4,
        }
    }

    /// The plain layout for a channel count (1..=4).
    pub fn from_channels(channels: u8) -> Option<Self> {
        match channels {
            1 => Some(ColorLayout::Gray),
            2 => Some(ColorLayout::GrayAlpha),
            3 => Some(ColorLayout::Rgb),
            4 => Some(ColorLayout::Rgba),
            _ => None,
        }
    }
}

/// Color table for indexed images. Always holds 256 entries; entries past the
/// ones the file defines are opaque black.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<[u8; 4]>,
    has_alpha: bool,
}

impl Palette {
    /// Builds a palette from RGBA entries, padding to 256.
    pub fn new(mut entries: Vec<[u8; 4]>) -> Self {
        entries.truncate(256);
        let has_alpha = entries.iter().any(|entry| entry[3] != 255);
        entries.resize(256, [0, 0, 0, 255]);
        Self { entries, has_alpha }
    }

    /// Builds a palette from packed RGB triples.
    pub fn from_rgb(rgb: &[u8]) -> Self {
        Self::new(
            rgb.chunks_exact(3)
                .map(|c| [c[0], c[1], c[2], 255])
                .collect(),
        )
    }

    /// Sets the alpha of entry `index`.
    pub fn set_alpha(&mut self, index: usize, alpha: u8) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry[3] = alpha;
            if alpha != 255 {
                self.has_alpha = true;
            }
        }
    }

    /// RGBA of entry `index`.
    pub fn get(&self, index: u8) -> [u8; 4] {
        self.entries[index as usize]
    }

    /// Whether any entry is not fully opaque
    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// 4 when some entry carries transparency, else 3.
    pub fn channels(&self) -> u8 {
        if self.has_alpha {
            4
        } else {
            3
        }
    }
}

/// Image metadata parsed from the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Native pixel layout of produced scanlines
    pub layout: ColorLayout,
    /// Bits per native sample, 8 or 16. 16-bit samples are big-endian.
    pub bit_depth: u8,
    /// Color table when `layout` is [`ColorLayout::Indexed`]
    pub palette: Option<Palette>,
}

impl ImageHeader {
    /// Bytes in one native scanline.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.layout.samples_per_pixel() * (self.bit_depth as usize / 8)
    }

    /// The channel count a decode with `channels == 0` produces.
    pub fn native_channels(&self) -> u8 {
        match self.layout {
            ColorLayout::Gray => 1,
            ColorLayout::GrayAlpha => 2,
            ColorLayout::Rgb | ColorLayout::YCbCr | ColorLayout::Cmyk | ColorLayout::Ycck => 3,
            ColorLayout::Rgba => 4,
            ColorLayout::Indexed => self.palette.as_ref().map_or(3, Palette::channels),
        }
    }
}

/// One decoded row in native layout, with its destination row index.
#[derive(Debug, Clone, Copy)]
pub struct Scanline<'a> {
    /// Row index in the final image (0 is the top)
    pub y: u32,
    /// Row samples in the header's layout and bit depth
    pub data: &'a [u8],
}

/// Used to decode an image. Implemented by every format decoder.
///
/// Implementations parse the header once, then hand out each of the image's
/// rows exactly once, in whatever order the format stores them.
pub trait ImageDecoder<'data>: Sized {
    /// Supplies the decoder with the image data
    fn new(data: &'data [u8], limits: Limits) -> Self;
    /// Parses the header and validates its dimensions.
    fn read_header(&mut self) -> Result<ImageHeader>;
    /// Decodes the next row. Returns `None` once every row was produced.
    fn read_row(&mut self) -> Result<Option<Scanline<'_>>>;
}
