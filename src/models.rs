//! Model resolution and metadata
//!
//! A model is either an external ONNX file (or a Hugging Face style model directory) on
//! disk, or a model previously downloaded into the [`ModelCache`].

use crate::cache::ModelCache;
use crate::error::{Result, RmbgError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// ONNX file for each supported variant, relative to the model directory
const VARIANT_FILES: &[(&str, &str)] = &[
    ("fp32", "onnx/model.onnx"),
    ("fp16", "onnx/model_fp16.onnx"),
    ("quantized", "onnx/model_quantized.onnx"),
];

/// Variant used when none is requested
pub const DEFAULT_VARIANT: &str = "fp32";

/// Hugging Face preprocessing file stored next to the ONNX files
pub const PREPROCESSOR_CONFIG_FILE: &str = "preprocessor_config.json";

/// Model source specification
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ModelSource {
    /// External model from filesystem path (an `.onnx` file or a model directory)
    External(PathBuf),
    /// Downloaded model from cache by model ID
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) => format!("cached:{}", model_id),
        }
    }
}

/// Complete model specification including source and optional variant
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(ModelCache::url_to_model_id(
                crate::config::DEFAULT_MODEL_URL,
            )),
            variant: None,
        }
    }
}

impl ModelSpec {
    /// Parse a `--model` argument: an existing path, a model URL, or a cached model ID
    #[must_use]
    pub fn parse(model_arg: &str, variant: Option<String>) -> Self {
        let source = if model_arg.starts_with("https://") || model_arg.starts_with("http://") {
            ModelSource::Downloaded(ModelCache::url_to_model_id(model_arg))
        } else if Path::new(model_arg).exists() {
            ModelSource::External(PathBuf::from(model_arg))
        } else {
            ModelSource::Downloaded(model_arg.to_string())
        };
        Self { source, variant }
    }

    /// Requested variant, falling back to the default
    #[must_use]
    pub fn variant_or_default(&self) -> &str {
        self.variant.as_deref().unwrap_or(DEFAULT_VARIANT)
    }
}

/// Relative ONNX file path for a variant name
///
/// # Errors
/// - Unknown variant name
pub fn variant_file(variant: &str) -> Result<&'static str> {
    VARIANT_FILES
        .iter()
        .find(|(name, _)| *name == variant)
        .map(|(_, file)| *file)
        .ok_or_else(|| {
            RmbgError::invalid_config(format!(
                "Unknown model variant: {variant}. Supported: fp32, fp16, quantized"
            ))
        })
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: u64,
}

/// Input preparation parameters for the segmentation model
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Model input size as `[height, width]`
    pub target_size: [u32; 2],
    /// Factor applied to raw `u8` channel values before normalization
    pub rescale_factor: f32,
    /// Per-channel mean subtracted after rescaling
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation divided after mean subtraction
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    /// RMBG-1.4 parameters
    fn default() -> Self {
        Self {
            target_size: [1024, 1024],
            rescale_factor: 1.0 / 255.0,
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

#[derive(Debug, Deserialize)]
struct HuggingFaceSize {
    height: u32,
    width: u32,
}

#[derive(Debug, Deserialize)]
struct HuggingFacePreprocessor {
    size: Option<HuggingFaceSize>,
    rescale_factor: Option<f32>,
    image_mean: Option<Vec<f32>>,
    image_std: Option<Vec<f32>>,
}

fn channel_triple(values: Option<Vec<f32>>, field: &str, fallback: [f32; 3]) -> Result<[f32; 3]> {
    match values {
        None => Ok(fallback),
        Some(values) => match values.as_slice() {
            [r, g, b] => Ok([*r, *g, *b]),
            [v] => Ok([*v, *v, *v]),
            _ => Err(RmbgError::invalid_config(format!(
                "{field} must have 1 or 3 values, got {}",
                values.len()
            ))),
        },
    }
}

impl PreprocessingConfig {
    /// Parse a Hugging Face `preprocessor_config.json`, filling gaps with RMBG-1.4 defaults
    ///
    /// # Errors
    /// - Invalid JSON
    /// - Mean/std arrays of the wrong length, zero std, or zero target size
    pub fn from_huggingface_json(json: &str) -> Result<Self> {
        let raw: HuggingFacePreprocessor = serde_json::from_str(json).map_err(|e| {
            RmbgError::invalid_config(format!("Failed to parse {PREPROCESSOR_CONFIG_FILE}: {e}"))
        })?;

        let defaults = Self::default();
        let config = Self {
            target_size: raw
                .size
                .map_or(defaults.target_size, |size| [size.height, size.width]),
            rescale_factor: raw.rescale_factor.unwrap_or(defaults.rescale_factor),
            normalization_mean: channel_triple(
                raw.image_mean,
                "image_mean",
                defaults.normalization_mean,
            )?,
            normalization_std: channel_triple(
                raw.image_std,
                "image_std",
                defaults.normalization_std,
            )?,
        };

        if config.target_size.contains(&0) {
            return Err(RmbgError::invalid_config("Model input size must be non-zero"));
        }
        if config.normalization_std.contains(&0.0) {
            return Err(RmbgError::invalid_config("image_std values must be non-zero"));
        }

        Ok(config)
    }
}

/// Resolves a [`ModelSpec`] to files on disk and loads them
#[derive(Debug, Clone)]
pub struct ModelManager {
    model_path: PathBuf,
    preprocessor_path: Option<PathBuf>,
    variant: String,
}

impl ModelManager {
    /// Resolve a model specification against the default cache
    ///
    /// # Errors
    /// - Cache directory unavailable
    /// - Any error from [`ModelManager::from_spec_with_cache`]
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        match &spec.source {
            ModelSource::External(_) => Self::from_spec_with_cache(spec, None),
            ModelSource::Downloaded(_) => {
                let cache = ModelCache::new()?;
                Self::from_spec_with_cache(spec, Some(&cache))
            },
        }
    }

    /// Resolve a model specification, looking up downloaded models in `cache`
    ///
    /// # Errors
    /// - Unknown variant
    /// - External path missing, or a directory without the variant's ONNX file
    /// - Downloaded model not present in the cache
    pub fn from_spec_with_cache(spec: &ModelSpec, cache: Option<&ModelCache>) -> Result<Self> {
        let variant = spec.variant_or_default().to_string();
        let relative = variant_file(&variant)?;

        let model_dir = match &spec.source {
            ModelSource::External(path) if path.is_file() => {
                return Ok(Self {
                    model_path: path.clone(),
                    preprocessor_path: path
                        .parent()
                        .map(|dir| dir.join(PREPROCESSOR_CONFIG_FILE))
                        .filter(|p| p.is_file()),
                    variant,
                });
            },
            ModelSource::External(path) if path.is_dir() => path.clone(),
            ModelSource::External(path) => {
                return Err(RmbgError::model(format!(
                    "Model path does not exist: {}",
                    path.display()
                )));
            },
            ModelSource::Downloaded(model_id) => {
                let cache = cache.ok_or_else(|| {
                    RmbgError::internal("Model cache required for downloaded models")
                })?;
                if !cache.is_model_cached(model_id) {
                    return Err(RmbgError::model(format!(
                        "Model '{model_id}' is not cached in {}",
                        cache.cache_dir().display()
                    )));
                }
                cache.get_model_path(model_id)
            },
        };

        // A flat directory holding model.onnx only stands in for the default variant
        let flat = Some(model_dir.join("model.onnx")).filter(|_| variant == DEFAULT_VARIANT);
        let model_path = std::iter::once(model_dir.join(relative))
            .chain(flat)
            .find(|p| p.is_file())
            .ok_or_else(|| {
                RmbgError::model(format!(
                    "No {variant} ONNX file found in {}",
                    model_dir.display()
                ))
            })?;

        let preprocessor_path = Some(model_dir.join(PREPROCESSOR_CONFIG_FILE)).filter(|p| p.is_file());

        Ok(Self {
            model_path,
            preprocessor_path,
            variant,
        })
    }

    /// Path of the ONNX file that will be loaded
    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Load the ONNX model bytes
    ///
    /// # Errors
    /// - Model file unreadable
    pub fn load_model(&self) -> Result<Vec<u8>> {
        fs::read(&self.model_path)
            .map_err(|e| RmbgError::file_io_error("read model", &self.model_path, &e))
    }

    /// Get model information for logging
    ///
    /// # Errors
    /// - Model file metadata unreadable
    pub fn get_info(&self) -> Result<ModelInfo> {
        let metadata = fs::metadata(&self.model_path)
            .map_err(|e| RmbgError::file_io_error("inspect model", &self.model_path, &e))?;
        Ok(ModelInfo {
            name: self
                .model_path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned(),
            precision: self.variant.clone(),
            size_bytes: metadata.len(),
        })
    }

    /// Preprocessing parameters from `preprocessor_config.json`, or RMBG-1.4 defaults
    ///
    /// # Errors
    /// - The preprocessor file exists but cannot be read or parsed
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        match &self.preprocessor_path {
            Some(path) => {
                let json = fs::read_to_string(path)
                    .map_err(|e| RmbgError::file_io_error("read preprocessor config", path, &e))?;
                PreprocessingConfig::from_huggingface_json(&json)
            },
            None => Ok(PreprocessingConfig::default()),
        }
    }
}
