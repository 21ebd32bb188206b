use std::f32::consts::{FRAC_1_SQRT_2, PI};

use super::header::QuantizationTable;

/// Separable floating point inverse DCT.
///
/// https://www.w3.org/Graphics/JPEG/itu-t81.pdf
/// A.3.3 Page 27
pub struct Idct {
    // cosines[x][u] = C(u) / 2 * cos((2x + 1) * u * PI / 16)
    cosines: [[f32; 8]; 8],
}

impl Idct {
    pub fn new() -> Self {
        let mut cosines = [[0f32; 8]; 8];
        for (x, row) in cosines.iter_mut().enumerate() {
            for (u, value) in row.iter_mut().enumerate() {
                let cu = if u == 0 { FRAC_1_SQRT_2 } else { 1.0 };
                *value = cu / 2.0 * f32::cos((2.0 * x as f32 + 1.0) * u as f32 * PI / 16.0);
            }
        }
        Self { cosines }
    }

    /// Dequantizes one block of natural-order coefficients and writes the
    /// level-shifted samples to `out`, whose rows are `stride` bytes apart.
    pub fn transform(
        &self,
        coefficients: &[i16],
        qtable: &QuantizationTable,
        out: &mut [u8],
        stride: usize,
    ) {
        let mut dequantized = [0f32; 64];
        for ((value, &coefficient), &quant) in dequantized.iter_mut().zip(coefficients).zip(qtable)
        {
            *value = coefficient as f32 * quant as f32;
        }

        // Horizontal pass: rows[v][x] = sum over u of F(v, u) * cosines[x][u]
        let mut rows = [0f32; 64];
        for v in 0..8 {
            for x in 0..8 {
                rows[v * 8 + x] = (0..8)
                    .map(|u| dequantized[v * 8 + u] * self.cosines[x][u])
                    .sum();
            }
        }

        for y in 0..8 {
            for x in 0..8 {
                let value: f32 = (0..8).map(|v| rows[v * 8 + x] * self.cosines[y][v]).sum();
                out[y * stride + x] = (value + 128.0).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_only_block_is_flat() {
        let idct = Idct::new();
        let mut coefficients = [0i16; 64];
        coefficients[0] = -16;
        let mut out = [0u8; 64];
        idct.transform(&coefficients, &[3; 64], &mut out, 8);
        // -16 * 3 / 8 = -6
        assert!(out.iter().all(|&sample| sample == 122));
    }

    #[test]
    fn single_ac_coefficient_matches_definition() {
        let idct = Idct::new();
        let mut coefficients = [0i16; 64];
        coefficients[1] = 40; // F(0, 1): horizontal frequency 1
        let mut out = [0u8; 128];
        idct.transform(&coefficients, &[1; 64], &mut out, 16);

        for y in 0..8 {
            for x in 0..8 {
                let expected = 128.0
                    + 0.25 * FRAC_1_SQRT_2 as f64
                        * 40.0
                        * ((2.0 * x as f64 + 1.0) * std::f64::consts::PI / 16.0).cos();
                let actual = out[y * 16 + x] as f64;
                assert!((actual - expected).abs() <= 1.0, "({x}, {y})");
            }
            assert!(out[y * 16 + 8..y * 16 + 16].iter().all(|&sample| sample == 0));
        }
    }

    #[test]
    fn output_is_clamped() {
        let idct = Idct::new();
        let mut coefficients = [0i16; 64];
        coefficients[0] = 2000;
        let mut out = [0u8; 64];
        idct.transform(&coefficients, &[1; 64], &mut out, 8);
        assert!(out.iter().all(|&sample| sample == 255));
    }
}
