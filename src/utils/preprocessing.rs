//! Model input preparation
//!
//! RMBG-1.4 was trained on images stretched to a square input, so preprocessing resizes
//! without preserving aspect ratio or padding. The mask is stretched back to the image
//! size during postprocessing.

use crate::{
    error::{Result, RmbgError},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;

/// Converts RGB images into normalized NCHW tensors
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Resize to the model input size and normalize into a `[1, 3, H, W]` tensor
    ///
    /// Each channel value becomes `(value * rescale_factor - mean) / std`.
    ///
    /// # Errors
    /// - Empty input image
    /// - Zero model input size
    pub fn preprocess_for_inference(
        image: &RgbImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(RmbgError::InvalidDimensions { width, height });
        }

        let [target_height, target_width] = preprocessing_config.target_size;
        if target_height == 0 || target_width == 0 {
            return Err(RmbgError::invalid_config("Model input size must be non-zero"));
        }

        let resized;
        let input = if (width, height) == (target_width, target_height) {
            image
        } else {
            resized = image::imageops::resize(image, target_width, target_height, FilterType::Triangle);
            &resized
        };

        Ok(Self::image_to_tensor(input, preprocessing_config))
    }

    fn image_to_tensor(image: &RgbImage, preprocessing_config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = image.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        let rescale = preprocessing_config.rescale_factor;
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        #[allow(clippy::indexing_slicing)]
        // Tensor dimensions are allocated from the image dimensions
        for (x, y, pixel) in image.enumerate_pixels() {
            for channel in 0..3 {
                tensor[[0, channel, y as usize, x as usize]] =
                    (f32::from(pixel[channel]) * rescale - mean[channel]) / std[channel];
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn small_config() -> PreprocessingConfig {
        PreprocessingConfig {
            target_size: [16, 24],
            ..PreprocessingConfig::default()
        }
    }

    #[test]
    fn test_tensor_shape_follows_target_size() {
        let image = RgbImage::from_pixel(100, 40, Rgb([255, 0, 0]));
        let tensor = ImagePreprocessor::preprocess_for_inference(&image, &small_config()).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 16, 24]);
    }

    #[test]
    fn test_rmbg_normalization() {
        let image = RgbImage::from_pixel(24, 16, Rgb([255, 0, 51]));
        let tensor = ImagePreprocessor::preprocess_for_inference(&image, &small_config()).unwrap();

        assert!((tensor[[0, 0, 3, 5]] - 0.5).abs() < 1e-6);
        assert!((tensor[[0, 1, 3, 5]] + 0.5).abs() < 1e-6);
        assert!((tensor[[0, 2, 3, 5]] + 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_custom_mean_and_std() {
        let config = PreprocessingConfig {
            target_size: [2, 2],
            rescale_factor: 1.0 / 255.0,
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
        };
        let image = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let tensor = ImagePreprocessor::preprocess_for_inference(&image, &config).unwrap();
        assert!((tensor[[0, 0, 0, 0]] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((tensor[[0, 2, 1, 1]] - (1.0 - 0.406) / 0.225).abs() < 1e-5);
    }

    #[test]
    fn test_channel_layout() {
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(1, 0, Rgb([255, 255, 255]));
        let config = PreprocessingConfig {
            target_size: [2, 2],
            ..PreprocessingConfig::default()
        };
        let tensor = ImagePreprocessor::preprocess_for_inference(&image, &config).unwrap();
        assert!((tensor[[0, 1, 0, 1]] - 0.5).abs() < 1e-6);
        assert!((tensor[[0, 1, 1, 0]] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_empty_image_rejected() {
        let image = RgbImage::new(0, 10);
        assert!(matches!(
            ImagePreprocessor::preprocess_for_inference(&image, &small_config()),
            Err(RmbgError::InvalidDimensions { width: 0, height: 10 })
        ));
    }
}
