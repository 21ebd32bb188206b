use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Sequential reader over an in-memory image. Every read is bounds checked and
/// running off the end yields [`Error::TruncatedInput`] without moving the
/// cursor.
#[derive(Debug, Clone)]
pub struct ByteReader<'data> {
    data: &'data [u8],
    position: usize,
}

impl<'data> ByteReader<'data> {
    pub fn new(data: &'data [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.position).ok_or(Error::TruncatedInput)?;
        self.position += 1;
        Ok(byte)
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.read_slice(2)?))
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.read_slice(2)?))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.read_slice(4)?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_slice(4)?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.read_slice(4)?))
    }

    /// Returns the next `len` bytes without advancing.
    pub fn peek(&self, len: usize) -> Result<&'data [u8]> {
        let end = self.position.checked_add(len).ok_or(Error::TruncatedInput)?;
        self.data.get(self.position..end).ok_or(Error::TruncatedInput)
    }

    /// Returns the next `len` bytes and advances past them.
    pub fn read_slice(&mut self, len: usize) -> Result<&'data [u8]> {
        let slice = self.peek(len)?;
        self.position += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_slice(len).map(|_| ())
    }

    /// Moves to an absolute offset. Seeking exactly to the end is allowed.
    pub fn seek_to(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(Error::TruncatedInput);
        }
        self.position = position;
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
