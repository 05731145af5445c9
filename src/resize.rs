//! Adaptive resize policy applied to uploads before segmentation
//!
//! Uploads are bounded both in total pixel area and in the length of their longest edge.
//! Images that already satisfy both bounds are passed through untouched so they are not
//! resampled at all; larger images are scaled down with their aspect ratio preserved.

use crate::error::{Result, RmbgError};
use image::{imageops::FilterType, RgbImage};
use tracing::debug;

/// Upper bounds applied to uploaded images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeConstraints {
    /// Maximum length of either edge in pixels
    max_edge: u32,
    /// Maximum number of pixels (width * height)
    max_area: u64,
}

impl ResizeConstraints {
    /// 1920 pixels on the longest edge, 1920x1080 pixels in total
    pub const DEFAULT: Self = Self {
        max_edge: 1920,
        max_area: 1920 * 1080,
    };

    /// Create constraints, rejecting zero bounds
    ///
    /// # Errors
    /// - `max_edge` or `max_area` is zero
    pub fn new(max_edge: u32, max_area: u64) -> Result<Self> {
        if max_edge == 0 {
            return Err(RmbgError::config_value_error("max_edge", max_edge, ">= 1"));
        }
        if max_area == 0 {
            return Err(RmbgError::config_value_error("max_area", max_area, ">= 1"));
        }
        Ok(Self { max_edge, max_area })
    }

    #[must_use]
    pub fn max_edge(&self) -> u32 {
        self.max_edge
    }

    #[must_use]
    pub fn max_area(&self) -> u64 {
        self.max_area
    }

    /// Whether an image of the given size can be used as-is
    #[must_use]
    pub fn is_satisfied_by(&self, width: u32, height: u32) -> bool {
        u64::from(width) * u64::from(height) <= self.max_area && width.max(height) <= self.max_edge
    }

    /// Compute the output dimensions for an input of `width` x `height`
    ///
    /// Compliant inputs are returned unchanged. Otherwise the longer side is derived from
    /// `sqrt(max_area * r)` (landscape) or `sqrt(max_area / r)` (portrait and square),
    /// capped at `max_edge`, and the shorter side follows from the aspect ratio `r`.
    /// Both results are floored and never drop below one pixel.
    ///
    /// # Errors
    /// - `width` or `height` is zero
    pub fn target_dimensions(&self, width: u32, height: u32) -> Result<(u32, u32)> {
        if width == 0 || height == 0 {
            return Err(RmbgError::InvalidDimensions { width, height });
        }

        if self.is_satisfied_by(width, height) {
            return Ok((width, height));
        }

        let aspect_ratio = f64::from(width) / f64::from(height);
        let max_area = self.max_area as f64;
        let max_edge = f64::from(self.max_edge);

        let (new_width, new_height) = if aspect_ratio > 1.0 {
            let new_width = (max_area * aspect_ratio).sqrt().floor().min(max_edge);
            (new_width, (new_width / aspect_ratio).floor())
        } else {
            let new_height = (max_area / aspect_ratio).sqrt().floor().min(max_edge);
            ((new_height * aspect_ratio).floor(), new_height)
        };

        Ok((to_dimension(new_width), to_dimension(new_height)))
    }
}

impl Default for ResizeConstraints {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_dimension(value: f64) -> u32 {
    (value as u32).max(1)
}

/// Resize an image so it satisfies `constraints`
///
/// Returns the input buffer itself when no resize is needed, otherwise a Lanczos3
/// resample at the dimensions given by [`ResizeConstraints::target_dimensions`].
///
/// # Errors
/// - The image has a zero width or height
pub fn smart_resize(image: RgbImage, constraints: &ResizeConstraints) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    let (new_width, new_height) = constraints.target_dimensions(width, height)?;

    if (new_width, new_height) == (width, height) {
        return Ok(image);
    }

    debug!(
        from = %format!("{width}x{height}"),
        to = %format!("{new_width}x{new_height}"),
        "Downscaling upload"
    );
    Ok(image::imageops::resize(
        &image,
        new_width,
        new_height,
        FilterType::Lanczos3,
    ))
}
