mod pam;

use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;
use rust_image_decoder::DecodeOptions;

use crate::pam::PamEncoder;

#[derive(Parser, Debug)]
#[command(
    name = "image-decoder-app",
    about = "Inspects and converts PNG, JPEG, GIF, BMP, PNM, TGA and PSD images",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// print the format, size and channel layout of an image
    Info {
        /// the image to inspect
        file: PathBuf,
    },
    /// decode an image and write it out as a PAM file
    Convert {
        /// the image to decode
        file: PathBuf,

        /// where to write the PAM output
        #[arg(long, short)]
        output: PathBuf,

        /// channels per pixel, 1 to 4. 0 keeps the image's own layout
        #[arg(long, short, default_value_t = 0)]
        channels: u8,

        /// store the bottom row first
        #[arg(long)]
        flip: bool,

        /// keep 16-bit samples instead of reducing them to 8 bits
        #[arg(long)]
        keep_16bit: bool,
    },
}

fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Info { file } => {
            let data = read_file(&file)?;
            let info = rust_image_decoder::probe(&data)
                .with_context(|| format!("failed to read the header of {}", file.display()))?;
            println!("format:    {:?}", info.format);
            println!("size:      {}x{}", info.width, info.height);
            println!("channels:  {}", info.channels);
            println!("bit depth: {}", info.bit_depth);
        }
        Command::Convert {
            file,
            output,
            channels,
            flip,
            keep_16bit,
        } => {
            if channels > 4 {
                bail!("--channels must be between 0 and 4, got {}", channels);
            }
            let data = read_file(&file)?;
            let options = DecodeOptions::new()
                .channels(channels)
                .flip_vertically(flip)
                .keep_16bit(keep_16bit);
            let image = rust_image_decoder::decode_with_options(&data, &options)
                .with_context(|| format!("failed to decode {}", file.display()))?;

            let out = File::create(&output)
                .with_context(|| format!("failed to create {}", output.display()))?;
            PamEncoder::new(&image)
                .encode(BufWriter::new(out))
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!(
                "wrote {}x{} {}-channel image to {}",
                image.width,
                image.height,
                image.channels,
                output.display()
            );
        }
    }
    Ok(())
}
