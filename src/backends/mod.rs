//! Inference engine implementations
//!
//! The ONNX Runtime backend is the only production engine. Unit tests run the pipeline
//! against a mock backend instead.

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;
