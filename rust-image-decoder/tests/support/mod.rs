//! Builds small images of every supported format in memory.
#![allow(dead_code)]

use std::f64::consts::{FRAC_1_SQRT_2, PI};
use std::ops::RangeInclusive;

use weezl::{encode::Encoder, BitOrder};

pub fn crc32(parts: &[&[u8]]) -> u32 {
    let mut crc = !0u32;
    for part in parts {
        for &byte in *part {
            crc ^= byte as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
            }
        }
    }
    !crc
}

pub fn adler32(data: &[u8]) -> u32 {
    let (mut a, mut b) = (1u32, 0u32);
    for &byte in data {
        a = (a + byte as u32) % 65521;
        b = (b + a) % 65521;
    }
    (b << 16) | a
}

// PNG

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

pub fn png_chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = (data.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc32(&[kind, data]).to_be_bytes());
    out
}

/// zlib stream holding `raw` in stored blocks
pub fn zlib_stored(raw: &[u8]) -> Vec<u8> {
    let mut out = vec![0x78, 0x01];
    let mut blocks = raw.chunks(0xFFFF).peekable();
    if blocks.peek().is_none() {
        out.extend_from_slice(&[0x01, 0x00, 0x00, 0xFF, 0xFF]);
    }
    while let Some(block) = blocks.next() {
        out.push(if blocks.peek().is_none() { 0x01 } else { 0x00 });
        let len = block.len() as u16;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(!len).to_le_bytes());
        out.extend_from_slice(block);
    }
    out.extend_from_slice(&adler32(raw).to_be_bytes());
    out
}

/// A PNG with the given IHDR fields, extra chunks before IDAT and an
/// already-compressed zlib stream.
pub fn png(width: u32, height: u32, depth: u8, color: u8, extra: &[Vec<u8>], zlib: &[u8]) -> Vec<u8> {
    let mut ihdr = width.to_be_bytes().to_vec();
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[depth, color, 0, 0, 0]);

    let mut out = PNG_SIGNATURE.to_vec();
    out.extend(png_chunk(b"IHDR", &ihdr));
    for chunk in extra {
        out.extend_from_slice(chunk);
    }
    out.extend(png_chunk(b"IDAT", zlib));
    out.extend(png_chunk(b"IEND", &[]));
    out
}

/// Unfiltered 8-bit PNG of `rows`, each already holding `width * samples`
/// bytes.
pub fn png_from_rows(width: u32, color: u8, rows: &[Vec<u8>]) -> Vec<u8> {
    let mut raw = Vec::new();
    for row in rows {
        raw.push(0);
        raw.extend_from_slice(row);
    }
    png(width, rows.len() as u32, 8, color, &[], &zlib_stored(&raw))
}

// BMP

/// Bottom-up 24-bit BMP. `rows` are top-down RGB.
pub fn bmp_24(width: u32, rows: &[Vec<u8>]) -> Vec<u8> {
    let stride = (width as usize * 3).div_ceil(4) * 4;
    let mut pixels = Vec::new();
    for row in rows.iter().rev() {
        let start = pixels.len();
        for rgb in row.chunks_exact(3) {
            pixels.extend_from_slice(&[rgb[2], rgb[1], rgb[0]]);
        }
        pixels.resize(start + stride, 0);
    }

    let offset = 14 + 40;
    let mut out = b"BM".to_vec();
    out.extend_from_slice(&((offset + pixels.len()) as u32).to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&(offset as u32).to_le_bytes());
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    out.extend_from_slice(&(rows.len() as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&24u16.to_le_bytes());
    out.extend_from_slice(&[0; 24]);
    out.extend_from_slice(&pixels);
    out
}

// TGA

/// Top-left origin, RLE-compressed 32-bit TGA. `rows` are top-down RGBA.
/// Runs of equal pixels become run packets, everything else raw packets.
pub fn tga_rle_32(width: u16, rows: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0, 0, 10, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&(rows.len() as u16).to_le_bytes());
    out.extend_from_slice(&[32, 0x28]);

    let pixels: Vec<[u8; 4]> = rows
        .iter()
        .flat_map(|row| row.chunks_exact(4))
        .map(|p| [p[2], p[1], p[0], p[3]])
        .collect();
    let mut i = 0;
    while i < pixels.len() {
        let mut run = 1;
        while i + run < pixels.len() && run < 128 && pixels[i + run] == pixels[i] {
            run += 1;
        }
        if run > 1 {
            out.push(0x80 | (run as u8 - 1));
            out.extend_from_slice(&pixels[i]);
        } else {
            out.push(0);
            out.extend_from_slice(&pixels[i]);
        }
        i += run;
    }
    out
}

// PNM

pub fn pnm(magic: &str, width: u32, height: u32, maxval: u32, raster: &[u8]) -> Vec<u8> {
    let mut out = format!("{magic}\n# test image\n{width} {height}\n{maxval}\n").into_bytes();
    out.extend_from_slice(raster);
    out
}

// PSD

fn pack_bits(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < row.len() {
        let mut run = 1;
        while i + run < row.len() && run < 128 && row[i + run] == row[i] {
            run += 1;
        }
        if run > 1 {
            out.push((257 - run) as u8);
            out.push(row[i]);
            i += run;
            continue;
        }
        let start = i;
        while i < row.len() && i - start < 128 && (i + 1 == row.len() || row[i + 1] != row[i]) {
            i += 1;
        }
        out.push((i - start - 1) as u8);
        out.extend_from_slice(&row[start..i]);
    }
    out
}

/// 8-bit RGBA document whose composite is PackBits-compressed.
pub fn psd_rgba(width: u32, rows: &[Vec<u8>]) -> Vec<u8> {
    let mut out = b"8BPS\x00\x01\0\0\0\0\0\0\x00\x04".to_vec();
    out.extend_from_slice(&(rows.len() as u32).to_be_bytes());
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&[0, 8, 0, 3]);
    out.extend_from_slice(&[0; 12]);
    out.extend_from_slice(&[0, 1]);

    let packed: Vec<Vec<u8>> = (0..4)
        .flat_map(|channel| {
            rows.iter()
                .map(move |row| pack_bits(&row.iter().skip(channel).step_by(4).copied().collect::<Vec<_>>()))
        })
        .collect();
    for row in &packed {
        out.extend_from_slice(&(row.len() as u16).to_be_bytes());
    }
    out.extend_from_slice(&packed.concat());
    out
}

// GIF

/// Non-interlaced GIF with one frame covering the whole screen.
pub fn gif(width: u16, height: u16, palette: &[[u8; 3]], transparent: Option<u8>, indices: &[u8]) -> Vec<u8> {
    let entries = palette.len().next_power_of_two().max(2);
    let size_bits = entries.trailing_zeros() as u8 - 1;

    let mut out = b"GIF89a".to_vec();
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&[0x80 | size_bits, 0, 0]);
    for entry in 0..entries {
        out.extend_from_slice(palette.get(entry).unwrap_or(&[0, 0, 0]));
    }
    if let Some(index) = transparent {
        out.extend_from_slice(&[0x21, 0xF9, 4, 0x01, 0, 0, index, 0]);
    }
    out.push(0x2C);
    for value in [0, 0, width, height] {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out.push(0);

    let min_code_size = (size_bits + 1).max(2);
    out.push(min_code_size);
    let data = Encoder::new(BitOrder::Lsb, min_code_size)
        .encode(indices)
        .unwrap();
    for block in data.chunks(255) {
        out.push(block.len() as u8);
        out.extend_from_slice(block);
    }
    out.extend_from_slice(&[0, 0x3B]);
    out
}

// JPEG

/// MSB-first bit writer with 0xFF byte stuffing.
#[derive(Default)]
pub struct BitWriter {
    out: Vec<u8>,
    acc: u8,
    len: u8,
}

impl BitWriter {
    pub fn put(&mut self, value: u32, bits: u8) {
        for i in (0..bits).rev() {
            self.acc = (self.acc << 1) | ((value >> i) & 1) as u8;
            self.len += 1;
            if self.len == 8 {
                self.out.push(self.acc);
                if self.acc == 0xFF {
                    self.out.push(0);
                }
                self.acc = 0;
                self.len = 0;
            }
        }
    }

    /// Pads the last byte with 1 bits.
    pub fn finish(mut self) -> Vec<u8> {
        while self.len != 0 {
            self.put(1, 1);
        }
        self.out
    }
}

/// Size category and extra bits of a coefficient value.
fn magnitude(value: i32) -> (u8, u32) {
    let size = (32 - value.unsigned_abs().leading_zeros()) as u8;
    let bits = if value >= 0 {
        value
    } else {
        value + (1 << size) - 1
    };
    (size, bits as u32)
}

/// Writes a DC difference with the test DC table, where the code for size
/// category `s` is `s` in 4 bits.
pub fn put_dc(writer: &mut BitWriter, diff: i32) {
    let (size, bits) = magnitude(diff);
    writer.put(size as u32, 4);
    writer.put(bits, size);
}

/// Largest AC size category the test AC table covers, so AC values must stay
/// within -31..=31.
pub const AC_MAX_SIZE: u8 = 5;

/// Symbols of the test AC table: EOB, ZRL, then every (run, size) pair with
/// size up to [`AC_MAX_SIZE`]. Each one is coded as its position in 7 bits.
pub fn ac_symbols() -> Vec<u8> {
    let mut symbols = vec![0x00, 0xF0];
    for run in 0..16u8 {
        for size in 1..=AC_MAX_SIZE {
            symbols.push((run << 4) | size);
        }
    }
    symbols
}

pub fn put_ac_symbol(writer: &mut BitWriter, symbol: u8) {
    let code = ac_symbols()
        .iter()
        .position(|&s| s == symbol)
        .expect("symbol missing from the test AC table");
    writer.put(code as u32, 7);
}

/// AC symbol 0x00: EOB in sequential scans and an end-of-band run of one
/// block in progressive ones.
pub fn put_eob(writer: &mut BitWriter) {
    put_ac_symbol(writer, 0x00);
}

/// One block of quantized coefficients in zigzag order; index 0 is DC.
pub type Block = [i32; 64];

pub fn dc_block(dc: i32) -> Block {
    let mut block = [0; 64];
    block[0] = dc;
    block
}

/// Codes the coefficients of `band` with run/size symbols, ZRL for runs of
/// sixteen zeros, and EOB unless the last coefficient of the band is nonzero.
pub fn put_ac(writer: &mut BitWriter, block: &Block, band: RangeInclusive<usize>) {
    let mut run = 0u8;
    for &value in &block[band] {
        if value == 0 {
            run += 1;
            continue;
        }
        while run >= 16 {
            put_ac_symbol(writer, 0xF0);
            run -= 16;
        }
        let (size, bits) = magnitude(value);
        assert!(size <= AC_MAX_SIZE, "AC value {value} is out of the test table's range");
        put_ac_symbol(writer, (run << 4) | size);
        writer.put(bits, size);
        run = 0;
    }
    if run > 0 {
        put_eob(writer);
    }
}

fn segment(out: &mut Vec<u8>, marker: u8, body: &[u8]) {
    out.extend_from_slice(&[0xFF, marker]);
    out.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(body);
}

/// One frame component: (identifier, horizontal, vertical sampling factor)
pub type Component = (u8, u8, u8);

/// SOI, an all-ones quantization table, the test Huffman tables, an optional
/// restart interval and the frame header.
pub fn jpeg_prologue(width: u16, height: u16, components: &[Component], progressive: bool, restart: u16) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    segment(&mut out, 0xE0, b"JFIF\0\x01\x02\0\0\x01\0\x01\0\0");

    let mut dqt = vec![0x00];
    dqt.extend_from_slice(&[1; 64]);
    segment(&mut out, 0xDB, &dqt);

    let mut dht = vec![0x00];
    let mut counts = [0u8; 16];
    counts[3] = 12;
    dht.extend_from_slice(&counts);
    dht.extend(0..12u8);

    let symbols = ac_symbols();
    dht.push(0x10);
    let mut counts = [0u8; 16];
    counts[6] = symbols.len() as u8;
    dht.extend_from_slice(&counts);
    dht.extend_from_slice(&symbols);
    segment(&mut out, 0xC4, &dht);

    if restart > 0 {
        segment(&mut out, 0xDD, &restart.to_be_bytes());
    }

    let mut sof = vec![8];
    sof.extend_from_slice(&height.to_be_bytes());
    sof.extend_from_slice(&width.to_be_bytes());
    sof.push(components.len() as u8);
    for &(id, h, v) in components {
        sof.extend_from_slice(&[id, (h << 4) | v, 0]);
    }
    segment(&mut out, if progressive { 0xC2 } else { 0xC0 }, &sof);
    out
}

/// Appends an SOS header for `ids` with the given band and approximation.
pub fn jpeg_scan_header(out: &mut Vec<u8>, ids: &[u8], band: (u8, u8), approximation: u8) {
    let mut sos = vec![ids.len() as u8];
    for &id in ids {
        sos.extend_from_slice(&[id, 0x00]);
    }
    sos.extend_from_slice(&[band.0, band.1, approximation]);
    segment(out, 0xDA, &sos);
}

/// Entropy-codes `units` MCUs (or blocks) with `encode`, splitting them into
/// restart intervals of `restart` units. Predictors start at zero in every
/// interval.
pub fn jpeg_entropy(
    out: &mut Vec<u8>,
    units: usize,
    restart: u16,
    mut encode: impl FnMut(&mut BitWriter, usize, &mut [i32; 4]),
) {
    let interval = if restart == 0 { units } else { restart as usize };
    let mut writer = BitWriter::default();
    let mut predictions = [0; 4];
    for unit in 0..units {
        if unit > 0 && unit % interval == 0 {
            out.extend(std::mem::take(&mut writer).finish());
            out.extend_from_slice(&[0xFF, 0xD0 + ((unit / interval - 1) % 8) as u8]);
            predictions = [0; 4];
        }
        encode(&mut writer, unit, &mut predictions);
    }
    out.extend(writer.finish());
}

/// Baseline grayscale JPEG of `blocks` in raster order.
pub fn jpeg_gray(width: u16, height: u16, blocks: &[Block], restart: u16) -> Vec<u8> {
    let mut out = jpeg_prologue(width, height, &[(1, 1, 1)], false, restart);
    jpeg_scan_header(&mut out, &[1], (0, 63), 0x00);
    jpeg_entropy(&mut out, blocks.len(), restart, |writer, index, predictions| {
        let block = &blocks[index];
        put_dc(writer, block[0] - predictions[0]);
        predictions[0] = block[0];
        put_ac(writer, block, 1..=63);
    });
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// Grayscale JPEG whose blocks only carry DC coefficients. `dc[i]` is the
/// coefficient of block `i` in raster order; with the all-ones quantization
/// table every sample of that block decodes to `128 + dc[i] / 8`.
pub fn jpeg_gray_dc(width: u16, height: u16, dc: &[i32], restart: u16) -> Vec<u8> {
    let blocks: Vec<Block> = dc.iter().map(|&dc| dc_block(dc)).collect();
    jpeg_gray(width, height, &blocks, restart)
}

/// The progressive form of [`jpeg_gray`]: a DC scan at half precision, one
/// AC scan per spectral band in `bands`, and a DC refinement scan.
pub fn jpeg_gray_progressive(width: u16, height: u16, blocks: &[Block], bands: &[(u8, u8)]) -> Vec<u8> {
    let mut out = jpeg_prologue(width, height, &[(1, 1, 1)], true, 0);

    jpeg_scan_header(&mut out, &[1], (0, 0), 0x01);
    jpeg_entropy(&mut out, blocks.len(), 0, |writer, index, predictions| {
        let value = blocks[index][0] >> 1;
        put_dc(writer, value - predictions[0]);
        predictions[0] = value;
    });

    for &(start, end) in bands {
        jpeg_scan_header(&mut out, &[1], (start, end), 0x00);
        jpeg_entropy(&mut out, blocks.len(), 0, |writer, index, _| {
            put_ac(writer, &blocks[index], start as usize..=end as usize)
        });
    }

    jpeg_scan_header(&mut out, &[1], (0, 0), 0x10);
    jpeg_entropy(&mut out, blocks.len(), 0, |writer, index, _| {
        writer.put((blocks[index][0] & 1) as u32, 1)
    });

    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// [`jpeg_gray_dc`] as a progressive image with a single, empty AC band.
pub fn jpeg_gray_dc_progressive(width: u16, height: u16, dc: &[i32]) -> Vec<u8> {
    let blocks: Vec<Block> = dc.iter().map(|&dc| dc_block(dc)).collect();
    jpeg_gray_progressive(width, height, &blocks, &[(1, 63)])
}

/// 4:2:0 YCbCr JPEG of a single 16x16 MCU (cropped to `width x height`).
/// `luma_dc` holds the four Y blocks in raster order; both chroma blocks are
/// neutral.
pub fn jpeg_ycbcr_420(width: u16, height: u16, luma_dc: [i32; 4]) -> Vec<u8> {
    let components = [(1, 2, 2), (2, 1, 1), (3, 1, 1)];
    let mut out = jpeg_prologue(width, height, &components, false, 0);
    jpeg_scan_header(&mut out, &[1, 2, 3], (0, 63), 0x00);
    jpeg_entropy(&mut out, 1, 0, |writer, _, predictions| {
        for dc in luma_dc {
            put_dc(writer, dc - predictions[0]);
            predictions[0] = dc;
            put_eob(writer);
        }
        for _ in 0..2 {
            put_dc(writer, 0);
            put_eob(writer);
        }
    });
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// 8x8 JPEG with one flat block per component. `components` pairs each
/// component identifier with its DC coefficient. `adobe` adds an Adobe APP14
/// segment carrying that color transform.
pub fn jpeg_flat_components(components: &[(u8, i32)], adobe: Option<u8>) -> Vec<u8> {
    let frame: Vec<Component> = components.iter().map(|&(id, _)| (id, 1, 1)).collect();
    let prologue = jpeg_prologue(8, 8, &frame, false, 0);
    let mut out = prologue[..2].to_vec();
    if let Some(transform) = adobe {
        let mut app14 = b"Adobe".to_vec();
        app14.extend_from_slice(&[0, 100, 0, 0, 0, 0, transform]);
        segment(&mut out, 0xEE, &app14);
    }
    out.extend_from_slice(&prologue[2..]);

    let ids: Vec<u8> = components.iter().map(|&(id, _)| id).collect();
    jpeg_scan_header(&mut out, &ids, (0, 63), 0x00);
    jpeg_entropy(&mut out, 1, 0, |writer, _, _| {
        for &(_, dc) in components {
            put_dc(writer, dc);
            put_eob(writer);
        }
    });
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

#[rustfmt::skip]
const ZIGZAG: [usize; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// Samples of `block` in raster order, computed straight from the IDCT
/// definition (ITU T.81 A.3.3) with the all-ones quantization table.
pub fn reference_samples(block: &Block) -> [u8; 64] {
    let mut natural = [0f64; 64];
    for (k, &value) in block.iter().enumerate() {
        natural[ZIGZAG[k]] = value as f64;
    }
    let scale = |u: usize| if u == 0 { FRAC_1_SQRT_2 } else { 1.0 };
    let basis = |x: usize, u: usize| ((2 * x + 1) as f64 * u as f64 * PI / 16.0).cos();

    let mut out = [0u8; 64];
    for y in 0..8 {
        for x in 0..8 {
            let mut sum = 0.0;
            for v in 0..8 {
                for u in 0..8 {
                    sum += scale(u) * scale(v) * natural[v * 8 + u] * basis(x, u) * basis(y, v);
                }
            }
            out[y * 8 + x] = (sum / 4.0 + 128.0).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
