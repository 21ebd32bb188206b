//! Format detection from leading bytes.

use crate::error::{Error, Result};

/// The formats this crate can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// Portable Network Graphics
    Png,
    /// JPEG / JFIF, baseline and progressive
    Jpeg,
    /// Graphics Interchange Format, first frame
    Gif,
    /// Windows bitmap
    Bmp,
    /// Binary portable graymap / pixmap (P5, P6)
    Pnm,
    /// Truevision TGA
    Tga,
    /// Photoshop document, composite image only
    Psd,
}

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];
const GIF87_SIGNATURE: &[u8] = b"GIF87a";
const GIF89_SIGNATURE: &[u8] = b"GIF89a";
const PSD_SIGNATURE: &[u8] = b"8BPS";

// DIB header sizes: core, info, v2, v3, v4, v5
const BMP_HEADER_SIZES: [u32; 6] = [12, 40, 52, 56, 108, 124];
const BMP_PROBE_LEN: usize = 18;
const TGA_HEADER_LEN: usize = 18;

enum Verdict {
    Match,
    /// The input ends inside the signature but agrees with it so far.
    Prefix,
    Mismatch,
}

fn check_signature(data: &[u8], signature: &[u8]) -> Verdict {
    let n = data.len().min(signature.len());
    if data[..n] != signature[..n] {
        Verdict::Mismatch
    } else if n < signature.len() {
        Verdict::Prefix
    } else {
        Verdict::Match
    }
}

fn check_bmp(data: &[u8]) -> Verdict {
    match check_signature(data, b"BM") {
        Verdict::Match => {}
        other => return other,
    }
    if data.len() < BMP_PROBE_LEN {
        return Verdict::Prefix;
    }
    let header_size = u32::from_le_bytes([data[14], data[15], data[16], data[17]]);
    if BMP_HEADER_SIZES.contains(&header_size) {
        Verdict::Match
    } else {
        Verdict::Mismatch
    }
}

fn check_pnm(data: &[u8]) -> Verdict {
    let prefix = match data.get(..2) {
        Some(prefix) => prefix,
        None => {
            return match data {
                [] | [b'P'] => Verdict::Prefix,
                _ => Verdict::Mismatch,
            }
        }
    };
    if prefix != b"P5" && prefix != b"P6" {
        return Verdict::Mismatch;
    }
    match data.get(2) {
        None => Verdict::Prefix,
        Some(c) if c.is_ascii_whitespace() => Verdict::Match,
        Some(_) => Verdict::Mismatch,
    }
}

/// TGA has no magic number, so the header fields have to look plausible. A
/// header cut short is judged on the fields it does contain.
fn check_tga(data: &[u8]) -> Verdict {
    let byte = |offset: usize| data.get(offset).copied();
    let word = |offset: usize| {
        data.get(offset..offset + 2)
            .map(|bytes| u16::from_le_bytes([bytes[0], bytes[1]]))
    };

    let colormap_type = byte(1);
    let type_ok = match (colormap_type, byte(2)) {
        (None, _) | (Some(0 | 1), None) => true,
        (Some(0), Some(image_type)) => matches!(image_type, 2 | 3 | 10 | 11),
        // 32 and 33 are the Huffman-coded color-mapped types
        (Some(1), Some(image_type)) => matches!(image_type, 1 | 9 | 32 | 33),
        _ => false,
    };
    let colormap_ok =
        colormap_type != Some(1) || byte(7).is_none_or(|bits| matches!(bits, 15 | 16 | 24 | 32));
    let plausible = type_ok
        && colormap_ok
        && word(12) != Some(0)
        && word(14) != Some(0)
        && byte(16).is_none_or(|bits| matches!(bits, 8 | 15 | 16 | 24 | 32));

    if !plausible {
        Verdict::Mismatch
    } else if data.len() < TGA_HEADER_LEN {
        Verdict::Prefix
    } else {
        Verdict::Match
    }
}

/// Identifies the image format from the first bytes of `data`.
///
/// Returns [`Error::TruncatedInput`] when the input is too short to tell but
/// agrees with some signature so far, and [`Error::UnknownFormat`] otherwise.
pub fn sniff(data: &[u8]) -> Result<ImageFormat> {
    let checks: [(ImageFormat, Verdict); 8] = [
        (ImageFormat::Png, check_signature(data, PNG_SIGNATURE)),
        (ImageFormat::Jpeg, check_signature(data, JPEG_SIGNATURE)),
        (ImageFormat::Gif, check_signature(data, GIF87_SIGNATURE)),
        (ImageFormat::Gif, check_signature(data, GIF89_SIGNATURE)),
        (ImageFormat::Bmp, check_bmp(data)),
        (ImageFormat::Pnm, check_pnm(data)),
        (ImageFormat::Psd, check_signature(data, PSD_SIGNATURE)),
        // last: a plausible TGA header is the weakest evidence
        (ImageFormat::Tga, check_tga(data)),
    ];

    let mut saw_prefix = false;
    for (format, verdict) in checks {
        match verdict {
            Verdict::Match => return Ok(format),
            Verdict::Prefix => saw_prefix = true,
            Verdict::Mismatch => {}
        }
    }

    if saw_prefix {
        Err(Error::TruncatedInput)
    } else {
        Err(Error::UnknownFormat)
    }
}
