use log::trace;

use crate::bytes::ByteReader;
use crate::error::{Error, Result};

use super::huffman::HuffmanTable;

/// Maps zigzag position to natural (row-major) position within a block.
#[rustfmt::skip]
pub const ZIGZAG: [usize; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// Quantization table in natural order
pub type QuantizationTable = [u16; 64];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameComponent {
    pub identifier: u8,
    pub xy_sampling_factor: (u8, u8),
    pub qtable_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub progressive: bool,
    pub image_size: (u16, u16),
    pub components: Vec<FrameComponent>,
}

impl FrameInfo {
    pub fn max_sampling_factor(&self) -> (u8, u8) {
        self.components
            .iter()
            .fold((1, 1), |(h_max, v_max), component| {
                (
                    h_max.max(component.xy_sampling_factor.0),
                    v_max.max(component.xy_sampling_factor.1),
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanComponent {
    /// Index into the frame's component list
    pub index: usize,
    pub dc_table: u8,
    pub ac_table: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanInfo {
    pub components: Vec<ScanComponent>,
    pub spectral_selection: (u8, u8),
    /// (Ah, Al): previous and current point transform
    pub successive_approximation: (u8, u8),
}

/// The tables a scan can reference, updated as DQT/DHT/DRI segments arrive.
#[derive(Debug, Default)]
pub struct Tables {
    pub quantization: [Option<QuantizationTable>; 4],
    pub dc: [Option<HuffmanTable>; 4],
    pub ac: [Option<HuffmanTable>; 4],
    pub restart_interval: u16,
}

/// A segment that ends before its fields do is malformed, not truncated: the
/// segment length already told us the bytes exist.
fn short_segment(error: Error) -> Error {
    match error {
        Error::TruncatedInput => Error::CorruptData("marker segment is too short"),
        error => error,
    }
}

pub fn read_start_of_frame(segment: &[u8], progressive: bool) -> Result<FrameInfo> {
    read_start_of_frame_inner(segment, progressive).map_err(short_segment)
}

fn read_start_of_frame_inner(segment: &[u8], progressive: bool) -> Result<FrameInfo> {
    let mut reader = ByteReader::new(segment);

    let precision = reader.read_u8()?;
    if precision != 8 {
        return Err(Error::UnsupportedFeature("JPEG sample precision other than 8 bits"));
    }

    let height = reader.read_u16_be()?;
    let width = reader.read_u16_be()?;
    if width == 0 || height == 0 {
        return Err(Error::CorruptData("zero image dimension"));
    }

    let component_count = reader.read_u8()?;
    match component_count {
        1 | 3 | 4 => {}
        0 => return Err(Error::CorruptData("frame has no components")),
        _ => return Err(Error::UnsupportedFeature("JPEG component count")),
    }

    let mut components: Vec<FrameComponent> = Vec::with_capacity(component_count as usize);
    for _ in 0..component_count {
        let identifier = reader.read_u8()?;
        if components.iter().any(|c| c.identifier == identifier) {
            return Err(Error::CorruptData("duplicate component identifier"));
        }

        let sample_factors = reader.read_u8()?;
        let xy_sampling_factor = (sample_factors >> 4, sample_factors & 0x0F);
        if !(1..=4).contains(&xy_sampling_factor.0) || !(1..=4).contains(&xy_sampling_factor.1)
        {
            return Err(Error::CorruptData("invalid sampling factor"));
        }

        let qtable_id = reader.read_u8()?;
        if qtable_id > 3 {
            return Err(Error::CorruptData("invalid quantization table id"));
        }

        components.push(FrameComponent {
            identifier,
            xy_sampling_factor,
            qtable_id,
        })
    }

    Ok(FrameInfo {
        progressive,
        image_size: (width, height),
        components,
    })
}

pub fn read_quantization_tables(segment: &[u8], tables: &mut Tables) -> Result<()> {
    let mut reader = ByteReader::new(segment);
    while !reader.is_empty() {
        let table_info = reader.read_u8().map_err(short_segment)?;
        let precision = table_info >> 4;
        let destination_id = table_info & 0x0F;
        if destination_id > 3 {
            return Err(Error::CorruptData("invalid quantization table id"));
        }

        let mut table = [0u16; 64];
        for &position in ZIGZAG.iter() {
            table[position] = match precision {
                0 => reader.read_u8().map_err(short_segment)? as u16,
                1 => reader.read_u16_be().map_err(short_segment)?,
                _ => return Err(Error::CorruptData("invalid quantization table precision")),
            };
        }
        trace!("DQT table {} ({}-bit)", destination_id, 8 << precision);
        tables.quantization[destination_id as usize] = Some(table);
    }
    Ok(())
}

pub fn read_huffman_tables(segment: &[u8], tables: &mut Tables) -> Result<()> {
    let mut reader = ByteReader::new(segment);
    while !reader.is_empty() {
        let table_info = reader.read_u8().map_err(short_segment)?;
        let class = table_info >> 4;
        let destination_id = (table_info & 0x0F) as usize;
        if class > 1 || destination_id > 3 {
            return Err(Error::CorruptData("invalid Huffman table class or id"));
        }

        let mut bitcode_counts = [0u8; 16];
        bitcode_counts.copy_from_slice(reader.read_slice(16).map_err(short_segment)?);
        let size: usize = bitcode_counts.iter().map(|&count| count as usize).sum();
        let symbols = reader.read_slice(size).map_err(short_segment)?;

        let table = HuffmanTable::new(&bitcode_counts, symbols)?;
        trace!(
            "DHT {} table {} ({} symbols)",
            if class == 0 { "DC" } else { "AC" },
            destination_id,
            size
        );
        if class == 0 {
            tables.dc[destination_id] = Some(table);
        } else {
            tables.ac[destination_id] = Some(table);
        }
    }
    Ok(())
}

pub fn read_restart_interval(segment: &[u8]) -> Result<u16> {
    if segment.len() != 2 {
        return Err(Error::CorruptData("DRI segment has the wrong length"));
    }
    Ok(u16::from_be_bytes([segment[0], segment[1]]))
}

/// The color transform flag of an Adobe APP14 segment, if this is one.
pub fn read_adobe_transform(segment: &[u8]) -> Option<u8> {
    if segment.len() >= 12 && segment.starts_with(b"Adobe") {
        Some(segment[11])
    } else {
        None
    }
}

/// Reads a scan header. The cursor is left at the start of the entropy-coded data.
pub fn read_start_of_scan(segment: &[u8], frame: &FrameInfo) -> Result<ScanInfo> {
    read_start_of_scan_inner(segment, frame).map_err(short_segment)
}

fn read_start_of_scan_inner(segment: &[u8], frame: &FrameInfo) -> Result<ScanInfo> {
    let mut reader = ByteReader::new(segment);

    let component_count = reader.read_u8()?;
    if component_count == 0 || component_count as usize > frame.components.len() {
        return Err(Error::CorruptData("invalid scan component count"));
    }

    let mut components: Vec<ScanComponent> = Vec::with_capacity(component_count as usize);
    for _ in 0..component_count {
        let selector = reader.read_u8()?;
        let index = frame
            .components
            .iter()
            .position(|c| c.identifier == selector)
            .ok_or(Error::CorruptData("scan references an unknown component"))?;
        if components.iter().any(|c| c.index == index) {
            return Err(Error::CorruptData("scan lists a component twice"));
        }

        let tables = reader.read_u8()?;
        let dc_table = tables >> 4;
        let ac_table = tables & 0x0F;
        if dc_table > 3 || ac_table > 3 {
            return Err(Error::CorruptData("invalid Huffman table id"));
        }

        components.push(ScanComponent {
            index,
            dc_table,
            ac_table,
        });
    }

    let spectral_selection_start = reader.read_u8()?;
    let spectral_selection_end = reader.read_u8()?;
    let approximation = reader.read_u8()?;
    let successive_approximation = (approximation >> 4, approximation & 0x0F);

    if frame.progressive {
        let (start, end) = (spectral_selection_start, spectral_selection_end);
        let valid_band = if start == 0 {
            end == 0
        } else {
            start <= end && end <= 63 && component_count == 1
        };
        if !valid_band || successive_approximation.1 > 13 {
            return Err(Error::CorruptData("invalid progressive scan parameters"));
        }
    } else if spectral_selection_start != 0
        || spectral_selection_end != 63
        || successive_approximation != (0, 0)
    {
        return Err(Error::CorruptData("invalid sequential scan parameters"));
    }

    Ok(ScanInfo {
        components,
        spectral_selection: (spectral_selection_start, spectral_selection_end),
        successive_approximation,
    })
}
