//! Background removal processor
//!
//! Wraps an [`InferenceBackend`] with the RMBG-1.4 pre- and postprocessing steps and
//! exposes the whole pipeline through the [`Segmenter`] trait.

use crate::{
    error::{Result, RmbgError},
    inference::{InferenceBackend, InferenceConfig},
    models::PreprocessingConfig,
    segmenter::Segmenter,
    utils::ImagePreprocessor,
};
use image::{GrayImage, RgbImage, RgbaImage};
use ndarray::Array4;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, instrument, span, Level};

/// Runs preprocessing, inference and mask application for a single loaded model
///
/// The backend sits behind a mutex because ONNX Runtime sessions need exclusive access
/// to run; concurrent requests are serialized at inference time.
pub struct BackgroundRemovalProcessor {
    backend: Mutex<Box<dyn InferenceBackend>>,
    preprocessing_config: PreprocessingConfig,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("preprocessing_config", &self.preprocessing_config)
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Initialize `backend` and wrap it in a processor
    ///
    /// # Errors
    /// - Backend initialization or model loading failures
    /// - Unreadable preprocessing configuration
    pub fn new(mut backend: Box<dyn InferenceBackend>, config: &InferenceConfig) -> Result<Self> {
        info!("Initializing background removal processor");
        debug!(execution_provider = %config.execution_provider, "Inference settings");

        if backend.is_initialized() {
            debug!("Backend already initialized");
        } else if let Some(load_time) = backend.initialize(config)? {
            info!(load_ms = load_time.as_millis() as u64, "Model loaded");
        }
        let preprocessing_config = backend.get_preprocessing_config()?;
        debug!(?preprocessing_config, "Preprocessing configuration");

        Ok(Self {
            backend: Mutex::new(backend),
            preprocessing_config,
        })
    }

    /// Build a processor backed by ONNX Runtime for the configured model
    ///
    /// # Errors
    /// - Model not found on disk or in the cache
    /// - Session creation failures
    #[cfg(feature = "onnx")]
    pub fn from_server_config(config: &crate::config::ServerConfig) -> Result<Self> {
        let model_manager = crate::models::ModelManager::from_spec(&config.model_spec)?;
        info!(
            model = %config.model_spec.source.display_name(),
            path = %model_manager.model_path().display(),
            "Loading model"
        );
        let backend = crate::backends::OnnxBackend::new(model_manager);
        Self::new(Box::new(backend), &InferenceConfig::from(config))
    }

    /// Remove the background from an RGB image
    ///
    /// The result has the same dimensions as `image`; alpha is the predicted foreground
    /// mask and the color channels are copied unchanged.
    ///
    /// # Errors
    /// - Empty image
    /// - Inference failures
    /// - Unexpected output tensor shape
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn remove_background(&self, image: &RgbImage) -> Result<RgbaImage> {
        let total_start = Instant::now();

        let input_tensor = {
            let _span = span!(Level::DEBUG, "preprocessing").entered();
            ImagePreprocessor::preprocess_for_inference(image, &self.preprocessing_config)?
        };

        let output_tensor = {
            let _span = span!(Level::DEBUG, "inference").entered();
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| RmbgError::internal("Inference backend lock poisoned"))?;
            backend.infer(&input_tensor)?
        };

        let result = {
            let _span = span!(Level::DEBUG, "postprocessing").entered();
            let mask = Self::tensor_to_mask(&output_tensor, image.dimensions())?;
            Self::apply_mask(image, &mask)
        };

        debug!(
            total_ms = total_start.elapsed().as_millis() as u64,
            "Background removed"
        );
        Ok(result)
    }

    /// Convert a `[1, 1, h, w]` output tensor into a mask of the given dimensions
    ///
    /// The mask is upsampled bilinearly, then min-max normalized. A constant mask has no
    /// range to normalize over and is clamped to `[0, 1]` instead.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn tensor_to_mask(tensor: &Array4<f32>, dimensions: (u32, u32)) -> Result<GrayImage> {
        let (batch, channels, mask_height, mask_width) = tensor.dim();
        if batch != 1 || channels != 1 || mask_height == 0 || mask_width == 0 {
            return Err(RmbgError::processing(format!(
                "Invalid output tensor shape: {:?}",
                tensor.shape()
            )));
        }

        let (width, height) = dimensions;
        let values = Self::upsample_bilinear(tensor, width as usize, height as usize);

        let (min, max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;

        let pixels: Vec<u8> = values
            .iter()
            .map(|&v| {
                let normalized = if range < f32::EPSILON {
                    v.clamp(0.0, 1.0)
                } else {
                    (v - min) / range
                };
                (normalized * 255.0) as u8
            })
            .collect();

        GrayImage::from_raw(width, height, pixels)
            .ok_or_else(|| RmbgError::processing("Mask buffer does not match image dimensions"))
    }

    /// Half-pixel-centered bilinear resampling of the first mask channel, row-major
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn upsample_bilinear(tensor: &Array4<f32>, width: usize, height: usize) -> Vec<f32> {
        let (_, _, src_height, src_width) = tensor.dim();
        let scale_x = src_width as f32 / width as f32;
        let scale_y = src_height as f32 / height as f32;

        let sample = |y: usize, x: usize| tensor.get([0, 0, y, x]).copied().unwrap_or(0.0);

        let axis = |dst: usize, scale: f32, len: usize| {
            let src = ((dst as f32 + 0.5) * scale - 0.5).max(0.0);
            let lo = (src.floor() as usize).min(len - 1);
            let hi = (lo + 1).min(len - 1);
            (lo, hi, src - lo as f32)
        };

        let mut values = Vec::with_capacity(width * height);
        for y in 0..height {
            let (y0, y1, wy) = axis(y, scale_y, src_height);
            for x in 0..width {
                let (x0, x1, wx) = axis(x, scale_x, src_width);
                let top = sample(y0, x0) * (1.0 - wx) + sample(y0, x1) * wx;
                let bottom = sample(y1, x0) * (1.0 - wx) + sample(y1, x1) * wx;
                values.push(top * (1.0 - wy) + bottom * wy);
            }
        }
        values
    }

    /// Copy RGB and take alpha from the mask
    fn apply_mask(image: &RgbImage, mask: &GrayImage) -> RgbaImage {
        RgbaImage::from_fn(image.width(), image.height(), |x, y| {
            let [r, g, b] = image.get_pixel(x, y).0;
            let [alpha] = mask.get_pixel(x, y).0;
            image::Rgba([r, g, b, alpha])
        })
    }
}

impl Segmenter for BackgroundRemovalProcessor {
    fn segment(&self, image: &RgbImage) -> Result<RgbaImage> {
        self.remove_background(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{MockBackend, MockMask};
    use image::Rgb;

    fn processor(backend: MockBackend) -> BackgroundRemovalProcessor {
        BackgroundRemovalProcessor::new(Box::new(backend), &InferenceConfig::default()).unwrap()
    }

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 200]))
    }

    #[test]
    fn test_output_matches_input_dimensions() {
        let processor = processor(MockBackend::new());
        let image = gradient_image(64, 40);
        let result = processor.segment(&image).unwrap();
        assert_eq!(result.dimensions(), (64, 40));
    }

    #[test]
    fn test_split_mask_alpha() {
        let processor = processor(MockBackend::new());
        let image = gradient_image(64, 40);
        let result = processor.segment(&image).unwrap();

        assert_eq!(result.get_pixel(0, 20).0[3], 0);
        assert_eq!(result.get_pixel(10, 5).0[3], 0);
        assert_eq!(result.get_pixel(63, 20).0[3], 255);
        assert_eq!(result.get_pixel(50, 39).0[3], 255);
    }

    #[test]
    fn test_rgb_kept_under_transparent_alpha() {
        let processor = processor(MockBackend::new());
        let image = gradient_image(64, 40);
        let result = processor.segment(&image).unwrap();

        for (x, y, pixel) in result.enumerate_pixels() {
            let [r, g, b] = image.get_pixel(x, y).0;
            assert_eq!(&pixel.0[..3], &[r, g, b]);
        }
    }

    #[test]
    fn test_mask_is_min_max_normalized() {
        let processor = processor(MockBackend::new().with_mask(MockMask::Ramp));
        let result = processor.segment(&gradient_image(64, 64)).unwrap();

        assert_eq!(result.get_pixel(0, 0).0[3], 0);
        assert_eq!(result.get_pixel(63, 63).0[3], 255);
    }

    #[test]
    fn test_constant_mask_is_clamped() {
        // Same size as the mock model input, so upsampling is exact
        let in_range = processor(MockBackend::new().with_mask(MockMask::Constant(0.7)));
        let result = in_range.segment(&gradient_image(32, 32)).unwrap();
        assert!(result.pixels().all(|p| (177..=179).contains(&p.0[3])));

        let saturated = processor(MockBackend::new().with_mask(MockMask::Constant(4.0)));
        let result = saturated.segment(&gradient_image(32, 32)).unwrap();
        assert!(result.pixels().all(|p| p.0[3] == 255));
    }

    #[test]
    fn test_inference_failure_propagates() {
        let processor = processor(MockBackend::new_failing_inference());
        let err = processor.segment(&gradient_image(8, 8)).unwrap_err();
        assert!(matches!(err, RmbgError::Inference(_)));
    }

    #[test]
    fn test_init_failure() {
        let result =
            BackgroundRemovalProcessor::new(Box::new(MockBackend::new_failing_init()), &InferenceConfig::default());
        assert!(matches!(result, Err(RmbgError::Model(_))));
    }

    #[test]
    fn test_backend_initialized_once() {
        let backend = MockBackend::new();
        let history = backend.call_history();
        let processor = processor(backend);
        processor.segment(&gradient_image(8, 8)).unwrap();
        processor.segment(&gradient_image(8, 8)).unwrap();

        let calls = history.lock().unwrap().clone();
        assert_eq!(calls.iter().filter(|c| *c == "initialize").count(), 1);
        assert_eq!(calls.iter().filter(|c| *c == "infer").count(), 2);
    }

    #[test]
    fn test_initialized_backend_is_not_reinitialized() {
        let mut backend = MockBackend::new();
        backend.initialize(&InferenceConfig::default()).unwrap();
        let history = backend.call_history();

        let processor = processor(backend);
        processor.segment(&gradient_image(8, 8)).unwrap();

        let calls = history.lock().unwrap().clone();
        assert_eq!(calls.iter().filter(|c| *c == "initialize").count(), 1);
    }

    #[test]
    fn test_invalid_tensor_shape() {
        let tensor = Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(BackgroundRemovalProcessor::tensor_to_mask(&tensor, (4, 4)).is_err());
    }

    #[test]
    fn test_upsample_preserves_corners() {
        let tensor = Array4::from_shape_vec((1, 1, 2, 2), vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let values = BackgroundRemovalProcessor::upsample_bilinear(&tensor, 4, 4);
        assert_eq!(values.len(), 16);
        assert!((values[0] - 0.0).abs() < 1e-6);
        assert!((values[15] - 3.0).abs() < 1e-6);
        assert!((values[1] - 0.25).abs() < 1e-6);
    }
}
