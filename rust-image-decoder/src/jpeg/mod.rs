mod header;
mod huffman;
mod idct;
mod marker;
mod scan;

use log::{debug, trace, warn};

use crate::{
    error::{Error, Result},
    image::{ColorLayout, ImageDecoder, ImageHeader, Scanline},
    options::Limits,
};
use header::{FrameInfo, Tables};
use idct::Idct;
use marker::{JpegMarker, JpegParser};
use scan::ComponentCoefficients;

/// Decodes baseline, extended and progressive Huffman-coded JPEG images.
pub struct JpegDecoder<'data> {
    parser: JpegParser<'data>,
    limits: Limits,
    tables: Tables,
    adobe_transform: Option<u8>,
    frame: Option<FrameInfo>,
    coefficients: Vec<ComponentCoefficients>,
    // Upsampling step of each component: (h_max / h, v_max / v)
    ratios: Vec<(usize, usize)>,
    planes: Vec<Vec<u8>>,
    scans: usize,
    next_row: u32,
    row: Vec<u8>,
}

impl<'data> JpegDecoder<'data> {
    /// Handles the table and miscellaneous segments that may appear anywhere
    /// before a scan. Returns false if `code` is not one of them.
    fn read_misc_segment(&mut self, code: u8) -> Result<bool> {
        let marker = JpegMarker::from_code(code);
        match marker {
            Some(JpegMarker::DQT) => {
                header::read_quantization_tables(self.parser.read_segment()?, &mut self.tables)?
            }
            Some(JpegMarker::DHT) => {
                header::read_huffman_tables(self.parser.read_segment()?, &mut self.tables)?
            }
            Some(JpegMarker::DRI) => {
                self.tables.restart_interval =
                    header::read_restart_interval(self.parser.read_segment()?)?;
                trace!("restart interval {}", self.tables.restart_interval);
            }
            Some(JpegMarker::APP14) => {
                let segment = self.parser.read_segment()?;
                if let Some(transform) = header::read_adobe_transform(segment) {
                    trace!("Adobe APP14 color transform {}", transform);
                    self.adobe_transform = Some(transform);
                }
            }
            Some(marker) if marker.restart_index().is_some() => {
                warn!("ignoring stray restart marker {:?}", marker);
            }
            Some(
                JpegMarker::SOI
                | JpegMarker::EOI
                | JpegMarker::SOS
                | JpegMarker::SOF0
                | JpegMarker::SOF1
                | JpegMarker::SOF2,
            ) => return Ok(false),
            Some(marker) if marker.is_unsupported_frame() => return Ok(false),
            _ => {
                // APPn, COM, DNL and anything unknown carry a length
                let segment = self.parser.read_segment()?;
                trace!("skipping marker {:#04X} ({} bytes)", code, segment.len());
            }
        }
        Ok(true)
    }

    fn layout(&self, frame: &FrameInfo) -> ColorLayout {
        match frame.components.len() {
            1 => ColorLayout::Gray,
            3 => {
                let ids: Vec<u8> = frame.components.iter().map(|c| c.identifier).collect();
                if self.adobe_transform == Some(0) || ids == b"RGB" {
                    ColorLayout::Rgb
                } else {
                    ColorLayout::YCbCr
                }
            }
            _ => {
                if self.adobe_transform == Some(2) {
                    ColorLayout::Ycck
                } else {
                    ColorLayout::Cmyk
                }
            }
        }
    }

    /// Runs every remaining scan up to EOI, then turns the coefficients into
    /// sample planes.
    fn decode_image(&mut self) -> Result<()> {
        let frame = self
            .frame
            .take()
            .ok_or(Error::InternalError("read_row called before read_header"))?;
        let result = self.decode_scans(&frame);
        self.frame = Some(frame);
        result?;

        if self.scans == 0 {
            return Err(Error::CorruptData("JPEG has no scans"));
        }
        self.planes = self.reconstruct_planes()?;
        debug!("JPEG: decoded {} scans", self.scans);
        Ok(())
    }

    fn decode_scans(&mut self, frame: &FrameInfo) -> Result<()> {
        loop {
            let code = self.parser.read_next_marker()?;
            if self.read_misc_segment(code)? {
                continue;
            }
            match JpegMarker::from_code(code) {
                Some(JpegMarker::SOS) => {
                    let scan = header::read_start_of_scan(self.parser.read_segment()?, frame)?;
                    scan::decode_scan(
                        &mut self.parser,
                        frame,
                        &scan,
                        &self.tables,
                        &mut self.coefficients,
                    )?;
                    self.scans += 1;
                }
                Some(JpegMarker::EOI) => return Ok(()),
                Some(JpegMarker::SOI) => return Err(Error::CorruptData("unexpected SOI marker")),
                _ => return Err(Error::CorruptData("multiple frames in one JPEG")),
            }
        }
    }

    fn reconstruct_planes(&self) -> Result<Vec<Vec<u8>>> {
        let frame = self
            .frame
            .as_ref()
            .ok_or(Error::InternalError("JPEG frame missing"))?;
        let idct = Idct::new();

        let mut planes = Vec::with_capacity(self.coefficients.len());
        for (component, coefficients) in frame.components.iter().zip(&self.coefficients) {
            let qtable = self.tables.quantization[component.qtable_id as usize]
                .as_ref()
                .ok_or(Error::CorruptData("component uses an undefined quantization table"))?;

            let stride = coefficients.blocks_per_line * 8;
            let mut plane = vec![0u8; stride * coefficients.blocks_per_column * 8];
            for block_y in 0..coefficients.blocks_per_column {
                for block_x in 0..coefficients.blocks_per_line {
                    let start = block_y * 8 * stride + block_x * 8;
                    idct.transform(
                        coefficients.block(block_x, block_y),
                        qtable,
                        &mut plane[start..],
                        stride,
                    );
                }
            }
            planes.push(plane);
        }
        Ok(planes)
    }
}

impl<'data> ImageDecoder<'data> for JpegDecoder<'data> {
    fn new(data: &'data [u8], limits: Limits) -> Self {
        Self {
            parser: JpegParser::new(data),
            limits,
            tables: Tables::default(),
            adobe_transform: None,
            frame: None,
            coefficients: Vec::new(),
            ratios: Vec::new(),
            planes: Vec::new(),
            scans: 0,
            next_row: 0,
            row: Vec::new(),
        }
    }

    fn read_header(&mut self) -> Result<ImageHeader> {
        if JpegMarker::from_code(self.parser.read_next_marker()?) != Some(JpegMarker::SOI) {
            return Err(Error::CorruptData("JPEG does not start with an SOI marker"));
        }

        let frame = loop {
            let code = self.parser.read_next_marker()?;
            if self.read_misc_segment(code)? {
                continue;
            }
            match JpegMarker::from_code(code) {
                Some(marker @ (JpegMarker::SOF0 | JpegMarker::SOF1 | JpegMarker::SOF2)) => {
                    let progressive = marker == JpegMarker::SOF2;
                    break header::read_start_of_frame(self.parser.read_segment()?, progressive)?;
                }
                Some(marker) if marker.is_unsupported_frame() => {
                    return Err(Error::UnsupportedFeature(
                        "lossless, hierarchical or arithmetic-coded JPEG",
                    ))
                }
                Some(JpegMarker::SOS) => {
                    return Err(Error::CorruptData("scan before frame header"))
                }
                _ => return Err(Error::CorruptData("no frame header before end of image")),
            }
        };

        let (width, height) = (frame.image_size.0 as u32, frame.image_size.1 as u32);
        let component_count = frame.components.len();
        let (h_max, v_max) = frame.max_sampling_factor();

        let mut ratios = Vec::with_capacity(component_count);
        for component in &frame.components {
            let (h, v) = component.xy_sampling_factor;
            if h_max % h != 0 || v_max % v != 0 {
                return Err(Error::UnsupportedFeature("non-integer chroma subsampling ratio"));
            }
            ratios.push(((h_max / h) as usize, (v_max / v) as usize));
        }

        // Coefficients take 2 bytes and reconstructed samples 1 byte per
        // sample of the padded MCU grid.
        let padded_width = width.div_ceil(8 * h_max as u32) * 8 * h_max as u32;
        let padded_height = height.div_ceil(8 * v_max as u32) * 8 * v_max as u32;
        self.limits.check(width, height, component_count)?;
        self.limits
            .check(padded_width, padded_height, component_count * 3)
            .map_err(|_| Error::DimensionOverflow { width, height })?;

        let layout = self.layout(&frame);
        debug!(
            "JPEG: {}x{} {:?} ({} components, sampling {}x{}, progressive {})",
            width, height, layout, component_count, h_max, v_max, frame.progressive
        );

        self.coefficients = (0..component_count)
            .map(|index| ComponentCoefficients::new(&frame, index))
            .collect();
        self.ratios = ratios;
        self.row = vec![0; width as usize * component_count];
        self.frame = Some(frame);

        Ok(ImageHeader {
            width,
            height,
            layout,
            bit_depth: 8,
            palette: None,
        })
    }

    fn read_row(&mut self) -> Result<Option<Scanline<'_>>> {
        let height = match &self.frame {
            Some(frame) => frame.image_size.1 as u32,
            None => return Err(Error::InternalError("read_row called before read_header")),
        };
        if self.next_row >= height {
            return Ok(None);
        }
        if self.planes.is_empty() {
            self.decode_image()?;
        }

        let y = self.next_row as usize;
        let components = self.planes.len();
        for (c, (plane, &(x_ratio, y_ratio))) in self.planes.iter().zip(&self.ratios).enumerate() {
            let stride = self.coefficients[c].blocks_per_line * 8;
            let source = &plane[(y / y_ratio) * stride..];
            for (x, pixel) in self.row.chunks_exact_mut(components).enumerate() {
                pixel[c] = source[x / x_ratio];
            }
        }

        let scanline = Scanline {
            y: self.next_row,
            data: &self.row,
        };
        self.next_row += 1;
        Ok(Some(scanline))
    }
}
