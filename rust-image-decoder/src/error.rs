use thiserror::Error;

/// Result type used throughout the decoder.
pub type Result<T> = core::result::Result<T, Error>;

/// Describes an error encountered while decoding an image.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The leading bytes do not match any supported format.
    #[error("unknown image format")]
    UnknownFormat,
    /// The input ended before the image was complete.
    #[error("unexpected end of input")]
    TruncatedInput,
    /// The image is malformed in some way. The string describes how.
    #[error("corrupt image data: {0}")]
    CorruptData(&'static str),
    /// The requested channel count cannot be produced.
    #[error("cannot convert image to {requested} channels")]
    UnsupportedConversion {
        /// The channel count the caller asked for
        requested: u8,
    },
    /// The declared dimensions exceed the configured limits or would overflow
    /// the pixel buffer size.
    #[error("image dimensions {width}x{height} are too large")]
    DimensionOverflow {
        /// Declared width
        width: u32,
        /// Declared height
        height: u32,
    },
    /// A legal feature of the format is not supported by the decoder
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),
    /// The decoder was driven incorrectly
    #[error("internal decoder error: {0}")]
    InternalError(&'static str),
}
