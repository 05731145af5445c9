//! Inference backend abstraction

use crate::{config::ExecutionProvider, error::Result, models::PreprocessingConfig};
use ndarray::Array4;
use std::time::Duration;

/// Session settings applied when a backend loads its model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InferenceConfig {
    /// Execution provider for the session
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads (0 = auto)
    pub inter_threads: usize,
}

impl From<&crate::config::ServerConfig> for InferenceConfig {
    fn from(config: &crate::config::ServerConfig) -> Self {
        Self {
            execution_provider: config.execution_provider,
            intra_threads: config.intra_threads,
            inter_threads: config.inter_threads,
        }
    }
}

/// Trait for inference backends
pub trait InferenceBackend: Send {
    /// Initialize the backend, returning the model load time on first call
    ///
    /// # Errors
    /// - Backend initialization failures
    /// - Model loading or validation errors
    fn initialize(&mut self, config: &InferenceConfig) -> Result<Option<Duration>>;

    /// Run inference on an NCHW input tensor, returning an NCHW mask tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Tensor conversion errors
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Get preprocessing configuration for this backend's model
    ///
    /// # Errors
    /// - Invalid or unreadable preprocessing configuration
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}
