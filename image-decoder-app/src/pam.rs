use std::io::{self, Write};

use rust_image_decoder::Image;

/// Writes decoded images as PAM (`P7`) files
pub struct PamEncoder<'image> {
    image: &'image Image,
}

impl<'image> PamEncoder<'image> {
    pub fn new(image: &'image Image) -> Self {
        Self { image }
    }

    fn tuple_type(&self) -> &'static str {
        match self.image.channels {
            1 => "GRAYSCALE",
            2 => "GRAYSCALE_ALPHA",
            3 => "RGB",
            _ => "RGB_ALPHA",
        }
    }

    /// Writes the header and raster. 16-bit samples are written big-endian
    /// as PAM requires.
    pub fn encode<W: Write>(&self, mut out: W) -> io::Result<()> {
        let image = self.image;
        let maxval = if image.bit_depth == 16 { 65535 } else { 255 };
        write!(
            out,
            "P7\nWIDTH {}\nHEIGHT {}\nDEPTH {}\nMAXVAL {}\nTUPLTYPE {}\nENDHDR\n",
            image.width,
            image.height,
            image.channels,
            maxval,
            self.tuple_type()
        )?;

        if image.bit_depth == 16 {
            let raster: Vec<u8> = image
                .pixels
                .chunks_exact(2)
                .flat_map(|sample| u16::from_ne_bytes([sample[0], sample[1]]).to_be_bytes())
                .collect();
            out.write_all(&raster)?;
        } else {
            out.write_all(&image.pixels)?;
        }
        out.flush()
    }
}
