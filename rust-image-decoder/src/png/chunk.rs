use log::trace;

use crate::bytes::ByteReader;
use crate::checksum::Crc32;
use crate::error::{Error, Result};

pub const IHDR: [u8; 4] = *b"IHDR";
pub const PLTE: [u8; 4] = *b"PLTE";
pub const TRNS: [u8; 4] = *b"tRNS";
pub const IDAT: [u8; 4] = *b"IDAT";
pub const IEND: [u8; 4] = *b"IEND";

/// A CRC-checked chunk borrowed from the input.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'data> {
    pub kind: [u8; 4],
    pub data: &'data [u8],
}

impl Chunk<'_> {
    /// Critical chunks have an uppercase first letter.
    pub fn is_critical(&self) -> bool {
        self.kind[0] & 0x20 == 0
    }
}

/// Reads one chunk and verifies its CRC.
pub fn read_chunk<'data>(reader: &mut ByteReader<'data>) -> Result<Chunk<'data>> {
    let length = reader.read_u32_be()?;
    if length > i32::MAX as u32 {
        return Err(Error::CorruptData("chunk length exceeds 2^31 - 1"));
    }

    let kind_bytes = reader.read_slice(4)?;
    let kind = [kind_bytes[0], kind_bytes[1], kind_bytes[2], kind_bytes[3]];
    if !kind.iter().all(u8::is_ascii_alphabetic) {
        return Err(Error::CorruptData("invalid chunk type"));
    }

    let data = reader.read_slice(length as usize)?;
    let stored_crc = reader.read_u32_be()?;

    let mut crc = Crc32::new();
    crc.update(&kind);
    crc.update(data);
    if crc.finish() != stored_crc {
        return Err(Error::CorruptData("chunk CRC mismatch"));
    }

    trace!(
        "PNG chunk {} ({} bytes)",
        String::from_utf8_lossy(&kind),
        length
    );
    Ok(Chunk { kind, data })
}
