//! Upload decoding and result encoding

use crate::error::Result;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, RgbImage, RgbaImage};

/// Converts between uploaded bytes and in-memory images
pub struct ImageCodec;

impl ImageCodec {
    /// Decode an uploaded image and normalize it to 3-channel RGB
    ///
    /// The format is sniffed from the content, never from a file name or content type.
    /// Any alpha channel is dropped.
    ///
    /// # Errors
    /// - Unrecognized or corrupt image data
    ///
    /// # Examples
    /// ```rust
    /// use rmbg_server::services::ImageCodec;
    ///
    /// assert!(ImageCodec::decode_rgb(b"not an image").is_err());
    /// ```
    pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
        let image = image::load_from_memory(bytes)?;
        log::debug!(
            "Decoded {}x{} {:?} upload",
            image.width(),
            image.height(),
            image.color()
        );
        Ok(image.into_rgb8())
    }

    /// Encode an RGBA image as PNG with maximum compression and adaptive filtering
    ///
    /// # Errors
    /// - PNG encoder failures
    pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, FilterType::Adaptive);
        encoder.write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )?;
        Ok(buffer)
    }
}
