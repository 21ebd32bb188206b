use crate::error::{Error, Result};

/// Bitstream reader. Reads bits most-significant first, as JPEG entropy-coded
/// segments store them. The segment must already be unstuffed.
#[derive(Debug)]
pub struct Bitstream<'data> {
    data: &'data [u8],
    byte_cursor: usize,
    bit_cursor: u8,
}

impl<'data> Bitstream<'data> {
    /// Creates a new bitstream.
    pub fn new(data: &'data [u8]) -> Self {
        Self {
            data,
            byte_cursor: 0,
            bit_cursor: 0,
        }
    }

    /// Reads a single bit.
    pub fn read_bit(&mut self) -> Result<u32> {
        let current_byte = *self
            .data
            .get(self.byte_cursor)
            .ok_or(Error::CorruptData("entropy-coded segment exhausted"))?;
        let bit = 1 & (current_byte >> (7 - self.bit_cursor));

        self.bit_cursor += 1;
        if self.bit_cursor == 8 {
            self.byte_cursor += 1;
            self.bit_cursor = 0;
        }
        Ok(bit as u32)
    }

    /// Reads up to 16 bits and returns them in the low bits of a u32.
    pub fn read_bits(&mut self, bits: u8) -> Result<u32> {
        if bits > 16 {
            return Err(Error::InternalError(
                "Can't read more than 16 bits at a time",
            ));
        }

        let mut value = 0;
        for _ in 0..bits {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }
}

/// Least-significant-bit-first reader used by DEFLATE.
#[derive(Debug)]
pub struct LsbBitstream<'data> {
    data: &'data [u8],
    byte_cursor: usize,
    bit_buffer: u64,
    bits_in_buffer: u8,
}

impl<'data> LsbBitstream<'data> {
    pub fn new(data: &'data [u8]) -> Self {
        Self {
            data,
            byte_cursor: 0,
            bit_buffer: 0,
            bits_in_buffer: 0,
        }
    }

    fn refill(&mut self, wanted: u8) -> Result<()> {
        while self.bits_in_buffer < wanted {
            let byte = *self
                .data
                .get(self.byte_cursor)
                .ok_or(Error::TruncatedInput)?;
            self.bit_buffer |= (byte as u64) << self.bits_in_buffer;
            self.bits_in_buffer += 8;
            self.byte_cursor += 1;
        }
        Ok(())
    }

    /// Reads `bits` (at most 32) bits, first bit in the lowest position.
    pub fn read_bits(&mut self, bits: u8) -> Result<u32> {
        if bits == 0 {
            return Ok(0);
        }
        if bits > 32 {
            return Err(Error::InternalError(
                "Can't read more than 32 bits at a time",
            ));
        }
        self.refill(bits)?;
        let value = (self.bit_buffer & ((1u64 << bits) - 1)) as u32;
        self.bit_buffer >>= bits;
        self.bits_in_buffer -= bits;
        Ok(value)
    }

    pub fn read_bit(&mut self) -> Result<u32> {
        self.read_bits(1)
    }

    /// Drops the bits left in the current partial byte.
    pub fn align_to_byte(&mut self) {
        let partial = self.bits_in_buffer % 8;
        self.bit_buffer >>= partial;
        self.bits_in_buffer -= partial;
    }

    /// Reads `len` whole bytes. Must be byte aligned.
    pub fn read_aligned_slice(&mut self, len: usize) -> Result<&'data [u8]> {
        if self.bits_in_buffer % 8 != 0 {
            return Err(Error::InternalError("bitstream is not byte aligned"));
        }
        // Give buffered whole bytes back to the slice.
        self.byte_cursor -= (self.bits_in_buffer / 8) as usize;
        self.bit_buffer = 0;
        self.bits_in_buffer = 0;

        let end = self
            .byte_cursor
            .checked_add(len)
            .ok_or(Error::TruncatedInput)?;
        let slice = self
            .data
            .get(self.byte_cursor..end)
            .ok_or(Error::TruncatedInput)?;
        self.byte_cursor = end;
        Ok(slice)
    }

    /// Bytes consumed so far, counting a partial byte as consumed.
    pub fn bytes_consumed(&self) -> usize {
        self.byte_cursor - (self.bits_in_buffer / 8) as usize
    }
}
