//! Mock backend for exercising the processing pipeline without a model file

use crate::{
    error::{Result, RmbgError},
    inference::{InferenceBackend, InferenceConfig},
    models::PreprocessingConfig,
};
use ndarray::Array4;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the mock fills its output mask
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockMask {
    /// Every pixel has the same raw value
    Constant(f32),
    /// Left half is background, right half is foreground
    SplitVertical,
    /// Raw values grow linearly from the top-left corner, outside of `[0, 1]`
    Ramp,
}

/// Mock inference backend
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    preprocessing_config: PreprocessingConfig,
    mask: MockMask,
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    /// Mock with a small model input and a split mask
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            preprocessing_config: PreprocessingConfig {
                target_size: [32, 32],
                ..PreprocessingConfig::default()
            },
            mask: MockMask::SplitVertical,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    #[must_use]
    pub fn with_mask(mut self, mask: MockMask) -> Self {
        self.mask = mask;
        self
    }

    /// Create a mock backend that will fail during initialization
    #[must_use]
    pub fn new_failing_init() -> Self {
        let mut backend = Self::new();
        backend.should_fail_init = true;
        backend
    }

    /// Create a mock backend that will fail during inference
    #[must_use]
    pub fn new_failing_inference() -> Self {
        let mut backend = Self::new();
        backend.should_fail_inference = true;
        backend
    }

    /// Shared call history, readable after the backend has been boxed
    #[must_use]
    pub fn call_history(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    fn generate_mock_output(&self, input: &Array4<f32>) -> Array4<f32> {
        let (batch, _, height, width) = input.dim();
        Array4::from_shape_fn((batch, 1, height, width), |(_, _, y, x)| match self.mask {
            MockMask::Constant(value) => value,
            MockMask::SplitVertical => {
                if x >= width / 2 {
                    1.0
                } else {
                    0.0
                }
            },
            MockMask::Ramp => (x + y) as f32 * 3.0 - 5.0,
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &InferenceConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(RmbgError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(150)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(RmbgError::internal("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(RmbgError::inference("Mock backend inference failed"));
        }

        Ok(self.generate_mock_output(input))
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.record_call("get_preprocessing_config");
        Ok(self.preprocessing_config.clone())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_lifecycle() {
        let mut backend = MockBackend::new();
        let history = backend.call_history();
        let input = Array4::<f32>::zeros((1, 3, 8, 8));

        assert!(backend.infer(&input).is_err());
        assert!(backend.initialize(&InferenceConfig::default()).unwrap().is_some());
        assert!(backend.initialize(&InferenceConfig::default()).unwrap().is_none());

        let output = backend.infer(&input).unwrap();
        assert_eq!(output.dim(), (1, 1, 8, 8));
        assert_eq!(output[[0, 0, 0, 0]], 0.0);
        assert_eq!(output[[0, 0, 0, 7]], 1.0);

        assert_eq!(
            history.lock().unwrap().as_slice(),
            ["infer", "initialize", "initialize", "infer"]
        );
    }

    #[test]
    fn test_mock_failures() {
        let mut backend = MockBackend::new_failing_init();
        assert!(backend.initialize(&InferenceConfig::default()).is_err());

        let mut backend = MockBackend::new_failing_inference();
        backend.initialize(&InferenceConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 4, 4))).is_err());
    }
}
