//! zlib (RFC 1950) and DEFLATE (RFC 1951) decompression for PNG image data.
//!
//! Stored, fixed-Huffman and dynamic-Huffman blocks are supported. The output
//! size is known in advance for PNG, so decompression stops as soon as the
//! stream tries to write past it.

use log::trace;

use crate::bitstream::LsbBitstream;
use crate::checksum::adler32;
use crate::error::{Error, Result};

const MAX_CODE_BITS: usize = 15;
const MAX_LITLEN_CODES: usize = 286;
const MAX_DIST_CODES: usize = 30;

// Length and distance tables from RFC 1951, section 3.2.5.
const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

// Order of code length code lengths in a dynamic block header.
const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Canonical Huffman code stored as per-length counts plus symbols sorted by
/// code.
struct Huffman {
    counts: [u16; MAX_CODE_BITS + 1],
    symbols: Vec<u16>,
}

impl Huffman {
    fn from_lengths(lengths: &[u8]) -> Result<Self> {
        let mut counts = [0u16; MAX_CODE_BITS + 1];
        for &len in lengths {
            counts[len as usize] += 1;
        }
        counts[0] = 0;

        // Reject over-subscribed codes. Incomplete ones are legal (a single
        // distance code is common) and fail only if an unused code shows up.
        let mut left: i32 = 1;
        for &count in &counts[1..] {
            left <<= 1;
            left -= count as i32;
            if left < 0 {
                return Err(Error::CorruptData("over-subscribed Huffman code"));
            }
        }

        let mut offsets = [0u16; MAX_CODE_BITS + 2];
        for len in 1..=MAX_CODE_BITS {
            offsets[len + 1] = offsets[len] + counts[len];
        }

        let mut symbols = vec![0u16; offsets[MAX_CODE_BITS + 1] as usize];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                symbols[offsets[len as usize] as usize] = symbol as u16;
                offsets[len as usize] += 1;
            }
        }

        Ok(Self { counts, symbols })
    }

    fn decode(&self, bits: &mut LsbBitstream) -> Result<u16> {
        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for len in 1..=MAX_CODE_BITS {
            code |= bits.read_bit()? as i32;
            let count = self.counts[len] as i32;
            if code - count < first {
                return Ok(self.symbols[(index + code - first) as usize]);
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }
        Err(Error::CorruptData("invalid Huffman code"))
    }
}

fn fixed_tables() -> Result<(Huffman, Huffman)> {
    let mut lengths = [0u8; 288];
    lengths[..144].fill(8);
    lengths[144..256].fill(9);
    lengths[256..280].fill(7);
    lengths[280..].fill(8);
    let litlen = Huffman::from_lengths(&lengths)?;
    let dist = Huffman::from_lengths(&[5u8; MAX_DIST_CODES])?;
    Ok((litlen, dist))
}

fn dynamic_tables(bits: &mut LsbBitstream) -> Result<(Huffman, Huffman)> {
    let hlit = bits.read_bits(5)? as usize + 257;
    let hdist = bits.read_bits(5)? as usize + 1;
    let hclen = bits.read_bits(4)? as usize + 4;
    if hlit > MAX_LITLEN_CODES || hdist > MAX_DIST_CODES {
        return Err(Error::CorruptData("too many length or distance codes"));
    }

    let mut code_lengths = [0u8; 19];
    for &index in &CODE_LENGTH_ORDER[..hclen] {
        code_lengths[index] = bits.read_bits(3)? as u8;
    }
    let code_length_code = Huffman::from_lengths(&code_lengths)?;

    let mut lengths = vec![0u8; hlit + hdist];
    let mut i = 0;
    while i < lengths.len() {
        let symbol = code_length_code.decode(bits)?;
        let (value, repeat) = match symbol {
            0..=15 => (symbol as u8, 1),
            16 => {
                if i == 0 {
                    return Err(Error::CorruptData("repeat with no previous length"));
                }
                (lengths[i - 1], 3 + bits.read_bits(2)? as usize)
            }
            17 => (0, 3 + bits.read_bits(3)? as usize),
            18 => (0, 11 + bits.read_bits(7)? as usize),
            _ => return Err(Error::CorruptData("invalid code length symbol")),
        };
        if i + repeat > lengths.len() {
            return Err(Error::CorruptData("code lengths overrun"));
        }
        lengths[i..i + repeat].fill(value);
        i += repeat;
    }

    if lengths[256] == 0 {
        return Err(Error::CorruptData("missing end-of-block code"));
    }

    let litlen = Huffman::from_lengths(&lengths[..hlit])?;
    let dist = Huffman::from_lengths(&lengths[hlit..])?;
    Ok((litlen, dist))
}

fn push_checked(out: &mut Vec<u8>, limit: usize, byte: u8) -> Result<()> {
    if out.len() >= limit {
        return Err(Error::CorruptData("decompressed data is larger than expected"));
    }
    out.push(byte);
    Ok(())
}

fn inflate_stored(bits: &mut LsbBitstream, out: &mut Vec<u8>, limit: usize) -> Result<()> {
    bits.align_to_byte();
    let len = bits.read_bits(16)? as u16;
    let nlen = bits.read_bits(16)? as u16;
    if len != !nlen {
        return Err(Error::CorruptData("stored block length check failed"));
    }
    if out.len() + len as usize > limit {
        return Err(Error::CorruptData("decompressed data is larger than expected"));
    }
    out.extend_from_slice(bits.read_aligned_slice(len as usize)?);
    Ok(())
}

fn inflate_codes(
    bits: &mut LsbBitstream,
    out: &mut Vec<u8>,
    limit: usize,
    litlen: &Huffman,
    dist: &Huffman,
) -> Result<()> {
    loop {
        let symbol = litlen.decode(bits)?;
        match symbol {
            0..=255 => push_checked(out, limit, symbol as u8)?,
            256 => return Ok(()),
            257..=285 => {
                let index = (symbol - 257) as usize;
                let length =
                    LENGTH_BASE[index] as usize + bits.read_bits(LENGTH_EXTRA[index])? as usize;

                let dist_symbol = dist.decode(bits)? as usize;
                if dist_symbol >= MAX_DIST_CODES {
                    return Err(Error::CorruptData("invalid distance symbol"));
                }
                let distance = DIST_BASE[dist_symbol] as usize
                    + bits.read_bits(DIST_EXTRA[dist_symbol])? as usize;
                if distance > out.len() {
                    return Err(Error::CorruptData("distance too far back"));
                }
                if out.len() + length > limit {
                    return Err(Error::CorruptData("decompressed data is larger than expected"));
                }

                // Copies may overlap their own output.
                let start = out.len() - distance;
                for k in 0..length {
                    let byte = out[start + k];
                    out.push(byte);
                }
            }
            _ => return Err(Error::CorruptData("invalid literal/length symbol")),
        }
    }
}

/// DEFLATE expands its input at most this many times.
const MAX_EXPANSION: usize = 1032;

/// Output space to reserve up front. A header can claim far more than the
/// compressed data could ever produce.
fn initial_capacity(compressed_len: usize, expected_len: usize) -> usize {
    expected_len.min(compressed_len.saturating_mul(MAX_EXPANSION))
}

/// Inflates a raw DEFLATE stream, returning the output and the number of input
/// bytes consumed.
pub fn inflate(data: &[u8], expected_len: usize) -> Result<(Vec<u8>, usize)> {
    let mut bits = LsbBitstream::new(data);
    let mut out = Vec::with_capacity(initial_capacity(data.len(), expected_len));

    loop {
        let last = bits.read_bit()? == 1;
        let block_type = bits.read_bits(2)?;
        trace!("deflate block type {} (final: {})", block_type, last);
        match block_type {
            0 => inflate_stored(&mut bits, &mut out, expected_len)?,
            1 => {
                let (litlen, dist) = fixed_tables()?;
                inflate_codes(&mut bits, &mut out, expected_len, &litlen, &dist)?;
            }
            2 => {
                let (litlen, dist) = dynamic_tables(&mut bits)?;
                inflate_codes(&mut bits, &mut out, expected_len, &litlen, &dist)?;
            }
            _ => return Err(Error::CorruptData("invalid deflate block type")),
        }
        if last {
            break;
        }
    }

    bits.align_to_byte();
    Ok((out, bits.bytes_consumed()))
}

/// Inflates a zlib stream whose decompressed size must be exactly
/// `expected_len`, verifying the header and the Adler-32 trailer.
///
/// The stream is complete when this is called, so running out of input is
/// reported as corruption rather than truncation.
pub fn inflate_zlib(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    inflate_zlib_inner(data, expected_len).map_err(|err| match err {
        Error::TruncatedInput => Error::CorruptData("zlib stream ended prematurely"),
        err => err,
    })
}

fn inflate_zlib_inner(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    if data.len() < 2 {
        return Err(Error::TruncatedInput);
    }
    let cmf = data[0];
    let flg = data[1];
    if cmf & 0x0F != 8 || cmf >> 4 > 7 {
        return Err(Error::CorruptData("zlib compression method is not deflate"));
    }
    if (u16::from(cmf) << 8 | u16::from(flg)) % 31 != 0 {
        return Err(Error::CorruptData("zlib header check failed"));
    }
    if flg & 0x20 != 0 {
        return Err(Error::CorruptData("zlib preset dictionary in PNG data"));
    }

    let (out, consumed) = inflate(&data[2..], expected_len)?;

    let trailer = data
        .get(2 + consumed..2 + consumed + 4)
        .ok_or(Error::TruncatedInput)?;
    let expected_adler = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if adler32(&out) != expected_adler {
        return Err(Error::CorruptData("Adler-32 mismatch"));
    }

    if out.len() != expected_len {
        return Err(Error::CorruptData("decompressed data is smaller than expected"));
    }
    Ok(out)
}
