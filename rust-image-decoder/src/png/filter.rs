use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::{Error, Result};

#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
enum FilterType {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

/// Scalar Paeth predictor.
#[inline]
fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    let a = a as i16;
    let b = b as i16;
    let c = c as i16;

    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();

    if pa <= pb && pa <= pc {
        a as u8
    } else if pb <= pc {
        b as u8
    } else {
        c as u8
    }
}

/// Reverses the filter on `line` in place. `previous` is the unfiltered
/// previous line of the same pass (all zeros for the first), `step` the number
/// of bytes per complete pixel (at least 1).
pub fn unfilter(filter: u8, line: &mut [u8], previous: &[u8], step: usize) -> Result<()> {
    let filter = FilterType::from_u8(filter).ok_or(Error::CorruptData("invalid filter type"))?;
    let step = step.min(line.len());

    match filter {
        FilterType::None => {}
        FilterType::Sub => {
            for k in step..line.len() {
                line[k] = line[k].wrapping_add(line[k - step]);
            }
        }
        FilterType::Up => {
            for (value, &above) in line.iter_mut().zip(previous) {
                *value = value.wrapping_add(above);
            }
        }
        FilterType::Average => {
            for k in 0..step {
                line[k] = line[k].wrapping_add(previous[k] / 2);
            }
            for k in step..line.len() {
                let average = (line[k - step] as u16 + previous[k] as u16) / 2;
                line[k] = line[k].wrapping_add(average as u8);
            }
        }
        FilterType::Paeth => {
            for k in 0..step {
                line[k] = line[k].wrapping_add(paeth_predictor(0, previous[k], 0));
            }
            for k in step..line.len() {
                let predictor = paeth_predictor(line[k - step], previous[k], previous[k - step]);
                line[k] = line[k].wrapping_add(predictor);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paeth_picks_nearest() {
        assert_eq!(paeth_predictor(10, 20, 10), 20);
        assert_eq!(paeth_predictor(20, 10, 10), 20);
        assert_eq!(paeth_predictor(0, 0, 0), 0);
        assert_eq!(paeth_predictor(100, 50, 200), 50);
    }

    #[test]
    fn sub_accumulates_per_pixel() {
        let mut line = [1, 2, 1, 1, 1, 1];
        unfilter(1, &mut line, &[0; 6], 2).unwrap();
        assert_eq!(line, [1, 2, 2, 3, 3, 4]);
    }

    #[test]
    fn up_adds_previous() {
        let mut line = [1, 2, 3];
        unfilter(2, &mut line, &[10, 20, 255], 1).unwrap();
        assert_eq!(line, [11, 22, 2]);
    }

    #[test]
    fn average_uses_left_and_up() {
        let mut line = [4, 4];
        unfilter(3, &mut line, &[8, 8], 1).unwrap();
        // first: 4 + 8/2 = 8; second: 4 + (8 + 8)/2 = 12
        assert_eq!(line, [8, 12]);
    }

    #[test]
    fn paeth_first_pixel_uses_up() {
        let mut line = [1, 1];
        unfilter(4, &mut line, &[50, 60], 1).unwrap();
        // second: paeth(51, 60, 50) = 60
        assert_eq!(line, [51, 61]);
    }

    #[test]
    fn unknown_filter_is_corrupt() {
        let mut line = [0u8; 3];
        assert_eq!(
            unfilter(5, &mut line, &[0; 3], 1),
            Err(Error::CorruptData("invalid filter type"))
        );
    }
}
