use log::warn;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::bytes::ByteReader;
use crate::error::{Error, Result};

#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(PartialEq, PartialOrd, FromPrimitive, Debug, Clone, Copy)]
pub enum JpegMarker {
    SOF0 = 0xFFC0,
    SOF1 = 0xFFC1,
    SOF2 = 0xFFC2,
    SOF3 = 0xFFC3,
    DHT = 0xFFC4,
    SOF5 = 0xFFC5,
    SOF6 = 0xFFC6,
    SOF7 = 0xFFC7,
    JPG = 0xFFC8,
    SOF9 = 0xFFC9,
    SOF10 = 0xFFCA,
    SOF11 = 0xFFCB,
    DAC = 0xFFCC,
    SOF13 = 0xFFCD,
    SOF14 = 0xFFCE,
    SOF15 = 0xFFCF,

    RST0 = 0xFFD0,
    RST1 = 0xFFD1,
    RST2 = 0xFFD2,
    RST3 = 0xFFD3,
    RST4 = 0xFFD4,
    RST5 = 0xFFD5,
    RST6 = 0xFFD6,
    RST7 = 0xFFD7,

    SOI = 0xFFD8,
    EOI = 0xFFD9,
    SOS = 0xFFDA,
    DQT = 0xFFDB,
    DNL = 0xFFDC,
    DRI = 0xFFDD,
    DHP = 0xFFDE,
    EXP = 0xFFDF,

    APP0 = 0xFFE0,
    APP1 = 0xFFE1,
    APP2 = 0xFFE2,
    APP3 = 0xFFE3,
    APP4 = 0xFFE4,
    APP5 = 0xFFE5,
    APP6 = 0xFFE6,
    APP7 = 0xFFE7,
    APP8 = 0xFFE8,
    APP9 = 0xFFE9,
    APP10 = 0xFFEA,
    APP11 = 0xFFEB,
    APP12 = 0xFFEC,
    APP13 = 0xFFED,
    APP14 = 0xFFEE,
    APP15 = 0xFFEF,

    COM = 0xFFFE,
}

impl JpegMarker {
    /// Maps the byte following `0xFF` to a marker.
    pub fn from_code(code: u8) -> Option<Self> {
        FromPrimitive::from_u16(0xFF00 | code as u16)
    }

    /// The n of RSTn.
    pub fn restart_index(self) -> Option<u8> {
        if self >= JpegMarker::RST0 && self <= JpegMarker::RST7 {
            Some((self as u16 - JpegMarker::RST0 as u16) as u8)
        } else {
            None
        }
    }

    /// Start-of-frame markers for processes this decoder does not implement:
    /// lossless, hierarchical and arithmetic coding.
    pub fn is_unsupported_frame(self) -> bool {
        matches!(
            self,
            JpegMarker::SOF3
                | JpegMarker::SOF5
                | JpegMarker::SOF6
                | JpegMarker::SOF7
                | JpegMarker::SOF9
                | JpegMarker::SOF10
                | JpegMarker::SOF11
                | JpegMarker::SOF13
                | JpegMarker::SOF14
                | JpegMarker::SOF15
        )
    }
}

/// Splits a JPEG stream into marker segments and entropy-coded data.
pub struct JpegParser<'data> {
    reader: ByteReader<'data>,
    pending: Option<u8>,
}

impl<'data> JpegParser<'data> {
    pub fn new(data: &'data [u8]) -> Self {
        Self {
            reader: ByteReader::new(data),
            pending: None,
        }
    }

    pub fn read_next_word(&mut self) -> Result<u16> {
        self.reader.read_u16_be()
    }

    /// Returns the code of the next marker. Fill bytes are skipped; anything
    /// else before the marker is skipped with a warning.
    pub fn read_next_marker(&mut self) -> Result<u8> {
        if let Some(code) = self.pending.take() {
            return Ok(code);
        }

        let mut skipped = 0usize;
        loop {
            if self.reader.read_u8()? != 0xFF {
                skipped += 1;
                continue;
            }
            let mut code = self.reader.read_u8()?;
            while code == 0xFF {
                code = self.reader.read_u8()?;
            }
            if code == 0x00 {
                skipped += 2;
                continue;
            }

            if skipped > 0 {
                warn!(
                    "skipped {} bytes of garbage before JPEG marker {:#04X}",
                    skipped, code
                );
            }
            return Ok(code);
        }
    }

    /// Makes `code` the next marker returned by [`Self::read_next_marker`].
    pub fn push_back_marker(&mut self, code: u8) {
        self.pending = Some(code);
    }

    /// Reads a length-prefixed marker segment and returns its payload.
    pub fn read_segment(&mut self) -> Result<&'data [u8]> {
        let length = self.read_next_word()?;
        if length < 2 {
            return Err(Error::CorruptData("marker segment length is too small"));
        }
        self.reader.read_slice(length as usize - 2)
    }

    /// Copies entropy-coded bytes up to the next marker into `out`, removing
    /// byte stuffing, and returns the terminating marker's code.
    pub fn read_entropy_segment(&mut self, out: &mut Vec<u8>) -> Result<u8> {
        out.clear();
        loop {
            let rest = self.reader.peek(self.reader.remaining())?;
            let run = rest
                .iter()
                .position(|&byte| byte == 0xFF)
                .ok_or(Error::TruncatedInput)?;
            out.extend_from_slice(&rest[..run]);
            self.reader.skip(run + 1)?;

            let mut code = self.reader.read_u8()?;
            while code == 0xFF {
                code = self.reader.read_u8()?;
            }
            if code == 0x00 {
                out.push(0xFF);
                continue;
            }
            return Ok(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    static TEST_HEADER: [u8; 16] = [
        0xFF, 0xD8,             // start of image
        0xFF, 0xFE,             // comment
        0, 3,                   // length
        65,                     // content
        0x12, 0x34,             // garbage
        0xFF, 0xFF, 0xC0,       // fill byte, then start of frame
        0, 2,                   // empty segment
        0xFF, 0xD9,             // end of image
    ];

    #[test]
    fn read_markers() {
        let mut parser = JpegParser::new(&TEST_HEADER);
        assert_eq!(parser.read_next_marker().unwrap(), 0xD8);
        assert_eq!(parser.read_next_marker().unwrap(), 0xFE);
        assert_eq!(parser.read_segment().unwrap(), &[65]);
        assert_eq!(parser.read_next_marker().unwrap(), 0xC0);
        assert!(parser.read_segment().unwrap().is_empty());
        assert_eq!(parser.read_next_marker().unwrap(), 0xD9);
        assert_eq!(parser.read_next_marker(), Err(Error::TruncatedInput));
    }

    #[test]
    fn marker_codes() {
        assert_eq!(JpegMarker::from_code(0xC2), Some(JpegMarker::SOF2));
        assert_eq!(JpegMarker::from_code(0xD5).unwrap().restart_index(), Some(5));
        assert_eq!(JpegMarker::SOS.restart_index(), None);
        assert!(JpegMarker::SOF9.is_unsupported_frame());
        assert!(!JpegMarker::SOF1.is_unsupported_frame());
        assert_eq!(JpegMarker::from_code(0x01), None);
    }

    #[test]
    fn entropy_segment_unstuffs_and_stops_at_marker() {
        let data = [0x12, 0xFF, 0x00, 0x34, 0xFF, 0xFF, 0xD0, 0x56];
        let mut parser = JpegParser::new(&data);
        let mut segment = Vec::new();
        assert_eq!(parser.read_entropy_segment(&mut segment).unwrap(), 0xD0);
        assert_eq!(segment, [0x12, 0xFF, 0x34]);

        parser.push_back_marker(0xD9);
        assert_eq!(parser.read_next_marker().unwrap(), 0xD9);
    }

    #[test]
    fn unterminated_entropy_segment_is_truncation() {
        let mut parser = JpegParser::new(&[0x12, 0x34]);
        assert_eq!(
            parser.read_entropy_segment(&mut Vec::new()),
            Err(Error::TruncatedInput)
        );
        let mut parser = JpegParser::new(&[0x12, 0xFF]);
        assert_eq!(
            parser.read_entropy_segment(&mut Vec::new()),
            Err(Error::TruncatedInput)
        );
    }
}
