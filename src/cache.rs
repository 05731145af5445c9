//! Model cache management for downloaded models
//!
//! Downloaded models live in an XDG-compliant cache directory, one directory per model
//! ID, laid out the way Hugging Face repositories are (`onnx/*.onnx` plus
//! `preprocessor_config.json`).

use crate::error::{Result, RmbgError};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "RMBG_SERVER_CACHE_DIR";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (derived from URL)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// Available ONNX model variants (fp32, fp16, quantized)
    pub variants: Vec<String>,
    /// Size of the model directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache manager for the default location
    ///
    /// - `$RMBG_SERVER_CACHE_DIR/models/` when the variable is set
    /// - Linux/macOS: `~/.cache/rmbg-server/models/`
    /// - Windows: `%LOCALAPPDATA%/rmbg-server/models/`
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn new() -> Result<Self> {
        Self::with_dir(Self::default_cache_dir()?)
    }

    /// Create a cache manager rooted at `cache_dir`, creating it if needed
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_dir<P: AsRef<Path>>(cache_dir: P) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)
                .map_err(|e| RmbgError::file_io_error("create cache directory", &cache_dir, &e))?;
        }
        Ok(Self { cache_dir })
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                RmbgError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV}."
                ))
            })?
            .join("rmbg-server")
            .join("models"))
    }

    /// Root directory of the cache
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Generate a model ID from a URL
    ///
    /// Hugging Face URLs map to `owner--repo`; any other URL maps to a short hash.
    ///
    /// ```
    /// use rmbg_server::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/briaai/RMBG-1.4");
    /// assert_eq!(id, "briaai--RMBG-1.4");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let prefix = "https://huggingface.co/";
        if let Some(repo) = url.strip_prefix(prefix) {
            repo.trim_end_matches('/').replace('/', "--")
        } else {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(url.as_bytes());
            let hash_string = format!("url-{:x}", hasher.finalize());
            hash_string.get(..16).unwrap_or(&hash_string).to_string()
        }
    }

    /// Check if a model directory exists and holds at least one ONNX file
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        !model_id.is_empty() && !Self::onnx_variants(&self.get_model_path(model_id)).is_empty()
    }

    /// Path to a cached model directory (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    /// Path to a variant's ONNX file inside a cached model (may not exist)
    ///
    /// # Errors
    /// - Unknown variant name
    pub fn model_file(&self, model_id: &str, variant: &str) -> Result<PathBuf> {
        Ok(self
            .get_model_path(model_id)
            .join(crate::models::variant_file(variant)?))
    }

    /// Scan the cache and return all usable models, sorted by ID
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| RmbgError::file_io_error("read cache directory", &self.cache_dir, &e))?;

        let mut models: Vec<CachedModelInfo> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter_map(|path| {
                let variants = Self::onnx_variants(&path);
                if variants.is_empty() {
                    log::debug!("Skipping invalid model directory: {}", path.display());
                    return None;
                }
                Some(CachedModelInfo {
                    model_id: path.file_name()?.to_str()?.to_string(),
                    size_bytes: directory_size(&path),
                    path,
                    variants,
                })
            })
            .collect();

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    fn onnx_variants(model_path: &Path) -> Vec<String> {
        let mut variants = Vec::new();
        let Ok(entries) = fs::read_dir(model_path.join("onnx")) else {
            if model_path.join("model.onnx").is_file() {
                variants.push("fp32".to_string());
            }
            return variants;
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(file_name) = name.to_str() else {
                continue;
            };
            match file_name {
                "model.onnx" => variants.push("fp32".to_string()),
                _ => {
                    if let Some(variant) = file_name
                        .strip_prefix("model_")
                        .and_then(|s| s.strip_suffix(".onnx"))
                    {
                        variants.push(variant.to_string());
                    }
                },
            }
        }
        variants.sort();
        variants
    }
}

fn directory_size(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| {
                    let path = entry.path();
                    if path.is_dir() {
                        directory_size(&path)
                    } else {
                        entry.metadata().map(|m| m.len()).unwrap_or(0)
                    }
                })
                .sum()
        })
        .unwrap_or(0)
}

/// Format a byte count for display
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", size, UNITS.get(unit).copied().unwrap_or("GB"))
    }
}
