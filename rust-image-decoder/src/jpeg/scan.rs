//! Entropy decoding of sequential and progressive scans into per-component
//! coefficient planes.
//!
//! https://www.w3.org/Graphics/JPEG/itu-t81.pdf
//! F.2.2 (sequential) and G.1.2 (progressive), page 104 onwards.

use log::trace;

use crate::bitstream::Bitstream;
use crate::error::{Error, Result};

use super::header::{FrameInfo, ScanComponent, ScanInfo, Tables, ZIGZAG};
use super::huffman::{receive_extend, HuffmanTable};
use super::marker::{JpegMarker, JpegParser};

/// Quantized DCT coefficients of one component, 64 per block in natural
/// order, for every block of the padded MCU grid.
#[derive(Debug, Clone)]
pub struct ComponentCoefficients {
    pub blocks_per_line: usize,
    pub blocks_per_column: usize,
    /// Blocks a non-interleaved scan of this component covers
    pub scan_blocks: (usize, usize),
    pub coefficients: Vec<i16>,
}

impl ComponentCoefficients {
    pub fn new(frame: &FrameInfo, index: usize) -> Self {
        let (width, height) = frame.image_size;
        let (h_max, v_max) = frame.max_sampling_factor();
        let (h, v) = frame.components[index].xy_sampling_factor;

        let mcus_x = (width as usize).div_ceil(8 * h_max as usize);
        let mcus_y = (height as usize).div_ceil(8 * v_max as usize);
        let blocks_per_line = mcus_x * h as usize;
        let blocks_per_column = mcus_y * v as usize;

        let component_width = (width as usize * h as usize).div_ceil(h_max as usize);
        let component_height = (height as usize * v as usize).div_ceil(v_max as usize);

        Self {
            blocks_per_line,
            blocks_per_column,
            scan_blocks: (component_width.div_ceil(8), component_height.div_ceil(8)),
            coefficients: vec![0; blocks_per_line * blocks_per_column * 64],
        }
    }

    pub fn block(&self, x: usize, y: usize) -> &[i16] {
        let start = (y * self.blocks_per_line + x) * 64;
        &self.coefficients[start..start + 64]
    }

    fn block_mut(&mut self, x: usize, y: usize) -> &mut [i16] {
        let start = (y * self.blocks_per_line + x) * 64;
        &mut self.coefficients[start..start + 64]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanKind {
    Sequential,
    DcFirst,
    DcRefine,
    AcFirst,
    AcRefine,
}

impl ScanKind {
    fn of(frame: &FrameInfo, scan: &ScanInfo) -> Self {
        let dc = scan.spectral_selection.0 == 0;
        let first = scan.successive_approximation.0 == 0;
        match (frame.progressive, dc, first) {
            (false, _, _) => ScanKind::Sequential,
            (true, true, true) => ScanKind::DcFirst,
            (true, true, false) => ScanKind::DcRefine,
            (true, false, true) => ScanKind::AcFirst,
            (true, false, false) => ScanKind::AcRefine,
        }
    }
}

struct ScanDecoder<'a> {
    kind: ScanKind,
    scan: &'a ScanInfo,
    tables: &'a Tables,
    predictions: [i32; 4],
    eobrun: u32,
}

impl<'a> ScanDecoder<'a> {
    fn reset(&mut self) {
        self.predictions = [0; 4];
        self.eobrun = 0;
    }

    fn dc_table(&self, component: &ScanComponent) -> Result<&'a HuffmanTable> {
        self.tables.dc[component.dc_table as usize]
            .as_ref()
            .ok_or(Error::CorruptData("scan uses an undefined DC Huffman table"))
    }

    fn ac_table(&self, component: &ScanComponent) -> Result<&'a HuffmanTable> {
        self.tables.ac[component.ac_table as usize]
            .as_ref()
            .ok_or(Error::CorruptData("scan uses an undefined AC Huffman table"))
    }

    fn decode_block(
        &mut self,
        bitstream: &mut Bitstream,
        component: &ScanComponent,
        block: &mut [i16],
    ) -> Result<()> {
        let (_, low_bit) = self.scan.successive_approximation;
        match self.kind {
            ScanKind::Sequential => {
                self.decode_dc_first(bitstream, component, block, 0)?;
                self.decode_ac_sequential(bitstream, component, block)
            }
            ScanKind::DcFirst => self.decode_dc_first(bitstream, component, block, low_bit),
            ScanKind::DcRefine => {
                if bitstream.read_bit()? == 1 {
                    block[0] |= 1 << low_bit;
                }
                Ok(())
            }
            ScanKind::AcFirst => self.decode_ac_first(bitstream, component, block, low_bit),
            ScanKind::AcRefine => self.decode_ac_refine(bitstream, component, block, low_bit),
        }
    }

    fn decode_dc_first(
        &mut self,
        bitstream: &mut Bitstream,
        component: &ScanComponent,
        block: &mut [i16],
        low_bit: u8,
    ) -> Result<()> {
        let size = self.dc_table(component)?.decode(bitstream)?; // DECODE
        let diff = receive_extend(bitstream, size)?; // RECEIVE, EXTEND

        let prediction = &mut self.predictions[component.index];
        *prediction = prediction.wrapping_add(diff);
        block[0] = (*prediction << low_bit) as i16;
        Ok(())
    }

    fn decode_ac_sequential(
        &mut self,
        bitstream: &mut Bitstream,
        component: &ScanComponent,
        block: &mut [i16],
    ) -> Result<()> {
        let ac_table = self.ac_table(component)?;

        let mut k = 1;
        while k < 64 {
            let huffman_val = ac_table.decode(bitstream)?;
            match huffman_val {
                0x00 => break,
                0xF0 => {
                    k += 16; // ZRL: sixteen zeroes
                    continue;
                }
                _ => {
                    k += (huffman_val >> 4) as usize;
                    if k > 63 {
                        return Err(Error::CorruptData("AC coefficient index out of range"));
                    }
                    block[ZIGZAG[k]] = receive_extend(bitstream, huffman_val & 0x0F)? as i16;
                    k += 1;
                }
            }
        }
        Ok(())
    }

    fn decode_ac_first(
        &mut self,
        bitstream: &mut Bitstream,
        component: &ScanComponent,
        block: &mut [i16],
        low_bit: u8,
    ) -> Result<()> {
        if self.eobrun > 0 {
            self.eobrun -= 1;
            return Ok(());
        }

        let ac_table = self.ac_table(component)?;
        let (start, end) = self.scan.spectral_selection;
        let end = end as usize;

        let mut k = start as usize;
        while k <= end {
            let huffman_val = ac_table.decode(bitstream)?;
            let run = huffman_val >> 4;
            let size = huffman_val & 0x0F;

            if size == 0 {
                if run < 15 {
                    // EOBn: this block plus 2^n - 1 + extra bits more
                    self.eobrun = (1 << run) - 1;
                    if run > 0 {
                        self.eobrun += bitstream.read_bits(run)?;
                    }
                    break;
                }
                k += 16;
                continue;
            }

            k += run as usize;
            if k > end {
                return Err(Error::CorruptData("AC coefficient index out of range"));
            }
            block[ZIGZAG[k]] = (receive_extend(bitstream, size)? * (1 << low_bit)) as i16;
            k += 1;
        }
        Ok(())
    }

    fn decode_ac_refine(
        &mut self,
        bitstream: &mut Bitstream,
        component: &ScanComponent,
        block: &mut [i16],
        low_bit: u8,
    ) -> Result<()> {
        let ac_table = self.ac_table(component)?;
        let (start, end) = self.scan.spectral_selection;
        let end = end as usize;
        let plus = 1i16 << low_bit;
        let minus = -1i16 << low_bit;

        let mut k = start as usize;
        if self.eobrun == 0 {
            while k <= end {
                let huffman_val = ac_table.decode(bitstream)?;
                let mut run = (huffman_val >> 4) as i32;
                let size = huffman_val & 0x0F;

                let mut value = 0;
                if size != 0 {
                    if size != 1 {
                        return Err(Error::CorruptData("refinement coefficient is not 1 bit"));
                    }
                    value = if bitstream.read_bit()? == 1 { plus } else { minus };
                } else if run != 15 {
                    self.eobrun = 1 << run;
                    if run > 0 {
                        self.eobrun += bitstream.read_bits(run as u8)?;
                    }
                    break;
                }

                // Skip `run` zero-history coefficients, refining the nonzero
                // ones passed on the way.
                while k <= end {
                    let coefficient = &mut block[ZIGZAG[k]];
                    if *coefficient != 0 {
                        refine(bitstream, coefficient, plus, minus)?;
                    } else {
                        run -= 1;
                        if run < 0 {
                            break;
                        }
                    }
                    k += 1;
                }

                if value != 0 {
                    if k > end {
                        return Err(Error::CorruptData("AC coefficient index out of range"));
                    }
                    block[ZIGZAG[k]] = value;
                }
                k += 1;
            }
        }

        if self.eobrun > 0 {
            while k <= end {
                let coefficient = &mut block[ZIGZAG[k]];
                if *coefficient != 0 {
                    refine(bitstream, coefficient, plus, minus)?;
                }
                k += 1;
            }
            self.eobrun -= 1;
        }
        Ok(())
    }
}

/// Appends one correction bit to a coefficient that is already nonzero.
fn refine(bitstream: &mut Bitstream, coefficient: &mut i16, plus: i16, minus: i16) -> Result<()> {
    if bitstream.read_bit()? == 1 && *coefficient & plus == 0 {
        if *coefficient >= 0 {
            *coefficient += plus;
        } else {
            *coefficient += minus;
        }
    }
    Ok(())
}

/// Decodes one scan, restart intervals included, into `components`. The
/// marker that ends the scan is pushed back onto the parser.
pub fn decode_scan(
    parser: &mut JpegParser,
    frame: &FrameInfo,
    scan: &ScanInfo,
    tables: &Tables,
    components: &mut [ComponentCoefficients],
) -> Result<()> {
    let mut decoder = ScanDecoder {
        kind: ScanKind::of(frame, scan),
        scan,
        tables,
        predictions: [0; 4],
        eobrun: 0,
    };

    let single = scan.components.len() == 1;
    let (h_max, v_max) = frame.max_sampling_factor();
    let (units_x, units_y) = if single {
        components[scan.components[0].index].scan_blocks
    } else {
        let (width, height) = frame.image_size;
        (
            (width as usize).div_ceil(8 * h_max as usize),
            (height as usize).div_ceil(8 * v_max as usize),
        )
    };
    let total = units_x * units_y;
    let restart_interval = tables.restart_interval as usize;
    trace!(
        "{:?} scan: {} components, {} units, restart interval {}",
        decoder.kind,
        scan.components.len(),
        total,
        restart_interval
    );

    let mut segment = Vec::new();
    let mut done = 0;
    let mut expected_restart = 0u8;
    loop {
        let marker = parser.read_entropy_segment(&mut segment)?;
        let count = if restart_interval > 0 {
            restart_interval.min(total - done)
        } else {
            total - done
        };

        let mut bitstream = Bitstream::new(&segment);
        decoder.reset();
        for unit in done..done + count {
            let (x, y) = (unit % units_x, unit / units_x);
            if single {
                let component = &scan.components[0];
                let block = components[component.index].block_mut(x, y);
                decoder.decode_block(&mut bitstream, component, block)?;
                continue;
            }
            for component in &scan.components {
                let (h, v) = frame.components[component.index].xy_sampling_factor;
                let (h, v) = (h as usize, v as usize);
                for block_y in 0..v {
                    for block_x in 0..h {
                        let block =
                            components[component.index].block_mut(x * h + block_x, y * v + block_y);
                        decoder.decode_block(&mut bitstream, component, block)?;
                    }
                }
            }
        }
        done += count;

        let restart_index = JpegMarker::from_code(marker).and_then(JpegMarker::restart_index);
        if done == total {
            // A restart marker after the last interval carries no information.
            if restart_index.is_none() {
                parser.push_back_marker(marker);
            }
            return Ok(());
        }
        match restart_index {
            Some(index) if index == expected_restart => {
                expected_restart = (expected_restart + 1) % 8;
            }
            Some(_) => return Err(Error::CorruptData("restart marker out of sequence")),
            None => {
                return Err(Error::CorruptData(
                    "scan ended before all blocks were decoded",
                ))
            }
        }
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

    fn progressive_scan(band: (u8, u8), approximation: (u8, u8)) -> ScanInfo {
        ScanInfo {
            components: vec![ScanComponent {
                index: 0,
                dc_table: 0,
                ac_table: 0,
            }],
            spectral_selection: band,
            successive_approximation: approximation,
        }
    }

    fn decoder<'a>(kind: ScanKind, scan: &'a ScanInfo, tables: &'a Tables) -> ScanDecoder<'a> {
        ScanDecoder {
            kind,
            scan,
            tables,
            predictions: [0; 4],
            eobrun: 0,
        }
    }

    #[test]
    fn ac_first_eob_run_skips_blocks() {
        // AC symbols: 0x20 = EOB2, code "0"; 0x01 = run 0 size 1, code "1"
        let mut tables = Tables::default();
        tables.ac[0] = Some(HuffmanTable::new(&counts(&[(1, 2)]), &[0x20, 0x01]).unwrap());
        let scan = progressive_scan((1, 63), (0, 0));
        let mut decoder = decoder(ScanKind::AcFirst, &scan, &tables);

        // "1" + magnitude bit "1" (+1), then EOB2 with extra bits "01": this
        // block and four more end here
        let data = [0b1_1_0_01_000];
        let mut bits = Bitstream::new(&data);
        let mut block = [0i16; 64];
        decoder.decode_block(&mut bits, &scan.components[0], &mut block).unwrap();
        assert_eq!(block[ZIGZAG[1]], 1);
        assert_eq!(block[ZIGZAG[2]], 0);
        assert_eq!(decoder.eobrun, 4);

        for _ in 0..4 {
            let mut skipped = [0i16; 64];
            decoder.decode_block(&mut bits, &scan.components[0], &mut skipped).unwrap();
            assert!(skipped.iter().all(|&c| c == 0));
        }
        assert_eq!(decoder.eobrun, 0);
    }

    #[test]
    fn ac_refine_corrects_existing_coefficients() {
        // AC symbols: 0x01 = new coefficient, code "0"; 0x00 = EOB, code "1"
        let mut tables = Tables::default();
        tables.ac[0] = Some(HuffmanTable::new(&counts(&[(1, 2)]), &[0x01, 0x00]).unwrap());
        let scan = progressive_scan((1, 3), (1, 0));
        let mut decoder = decoder(ScanKind::AcRefine, &scan, &tables);

        let mut block = [0i16; 64];
        block[ZIGZAG[1]] = 2;
        block[ZIGZAG[3]] = -2;

        // symbol "0" (new coefficient), sign "1" -> +1; passing zigzag 1
        // reads correction "1" -> 3; new value lands on zigzag 2.
        // Then EOB "1" with correction for zigzag 3: "1" -> -3.
        let data = [0b0_1_1_1_1_000];
        let mut bits = Bitstream::new(&data);
        decoder.decode_block(&mut bits, &scan.components[0], &mut block).unwrap();

        assert_eq!(block[ZIGZAG[1]], 3);
        assert_eq!(block[ZIGZAG[2]], 1);
        assert_eq!(block[ZIGZAG[3]], -3);
        assert_eq!(decoder.eobrun, 0);
    }

    #[test]
    fn dc_refine_sets_bit() {
        let tables = Tables::default();
        let scan = progressive_scan((0, 0), (1, 0));
        let mut decoder = decoder(ScanKind::DcRefine, &scan, &tables);
        let mut block = [0i16; 64];
        block[0] = 4;
        decoder
            .decode_block(&mut Bitstream::new(&[0x80]), &scan.components[0], &mut block)
            .unwrap();
        assert_eq!(block[0], 5);
    }

    #[test]
    fn missing_table_is_corrupt() {
        let tables = Tables::default();
        let scan = progressive_scan((0, 0), (0, 0));
        let mut decoder = decoder(ScanKind::DcFirst, &scan, &tables);
        assert_eq!(
            decoder.decode_block(&mut Bitstream::new(&[0]), &scan.components[0], &mut [0i16; 64]),
            Err(Error::CorruptData("scan uses an undefined DC Huffman table"))
        );
    }
}
