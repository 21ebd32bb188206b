use crate::bitstream::Bitstream;
use crate::error::{Error, Result};

/// Canonical Huffman table in the decoding form of ITU T.81 Annex F.2.2.3.
#[derive(Debug, Clone)]
pub struct HuffmanTable {
    // Indexed by code length, 1..=16.
    maxcode: [i32; 17],
    mincode: [i32; 17],
    valptr: [i32; 17],
    symbols: Vec<u8>,
}

impl HuffmanTable {
    /// Builds a table from the per-length code counts and the symbols in
    /// code order, as a DHT segment stores them.
    pub fn new(bitcode_counts: &[u8; 16], symbols: &[u8]) -> Result<Self> {
        let total: usize = bitcode_counts.iter().map(|&count| count as usize).sum();
        if total != symbols.len() || total > 256 {
            return Err(Error::CorruptData("Huffman table symbol count mismatch"));
        }

        let mut maxcode = [-1; 17];
        let mut mincode = [0; 17];
        let mut valptr = [0; 17];
        let mut code = 0i32;
        let mut index = 0i32;
        for length in 1..=16 {
            let count = bitcode_counts[length - 1] as i32;
            valptr[length] = index;
            mincode[length] = code;
            code += count;
            index += count;
            if count > 0 {
                maxcode[length] = code - 1;
            }
            if code > 1 << length {
                return Err(Error::CorruptData("Huffman code lengths are oversubscribed"));
            }
            code <<= 1;
        }

        Ok(Self {
            maxcode,
            mincode,
            valptr,
            symbols: symbols.to_vec(),
        })
    }

    /// Decodes one symbol.
    pub fn decode(&self, bitstream: &mut Bitstream) -> Result<u8> {
        let mut code = 0i32;
        for length in 1..=16 {
            code = (code << 1) | bitstream.read_bit()? as i32;
            if code <= self.maxcode[length] {
                let index = self.valptr[length] + code - self.mincode[length];
                return Ok(self.symbols[index as usize]);
            }
        }
        Err(Error::CorruptData("invalid Huffman code"))
    }
}

/// Reads `size` extra bits and sign-extends them (RECEIVE and EXTEND).
pub fn receive_extend(bitstream: &mut Bitstream, size: u8) -> Result<i32> {
    if size == 0 {
        return Ok(0);
    }
    if size > 16 {
        return Err(Error::CorruptData("coefficient magnitude category too large"));
    }
    let value = bitstream.read_bits(size)? as i32;
    if value < 1 << (size - 1) {
        Ok(value - (1 << size) + 1)
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(usize, u8)]) -> [u8; 16] {
        let mut counts = [0u8; 16];
        for &(length, count) in pairs {
            counts[length - 1] = count;
        }
        counts
    }

    #[test]
    fn decodes_canonical_codes() {
        // lengths: A=1 (0), B=2 (10), C=3 (110), D=3 (111)
        let table = HuffmanTable::new(&counts(&[(1, 1), (2, 1), (3, 2)]), b"ABCD").unwrap();
        let data = [0b0_10_110_11, 0b1_0000000];
        let mut bits = Bitstream::new(&data);
        let decoded: Vec<u8> = (0..5).map(|_| table.decode(&mut bits).unwrap()).collect();
        assert_eq!(decoded, b"ABCDA");
    }

    #[test]
    fn oversubscribed_lengths_are_rejected() {
        assert!(HuffmanTable::new(&counts(&[(1, 3)]), b"abc").is_err());
        assert!(HuffmanTable::new(&counts(&[(1, 1)]), b"ab").is_err());
    }

    #[test]
    fn unassigned_code_is_corrupt() {
        let table = HuffmanTable::new(&counts(&[(1, 1)]), b"A").unwrap();
        let data = [0xFF, 0xFF, 0xFF];
        assert_eq!(
            table.decode(&mut Bitstream::new(&data)),
            Err(Error::CorruptData("invalid Huffman code"))
        );
    }

    #[test]
    fn extend_sign() {
        let data = [0b011_100_00];
        let mut bits = Bitstream::new(&data);
        assert_eq!(receive_extend(&mut bits, 3).unwrap(), -4);
        assert_eq!(receive_extend(&mut bits, 3).unwrap(), 4);
        assert_eq!(receive_extend(&mut bits, 0).unwrap(), 0);
    }
}
