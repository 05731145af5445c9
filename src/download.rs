//! Model downloading from `HuggingFace` repositories
//!
//! Files are streamed into a temporary directory and moved into the cache only once the
//! ONNX file has been fully written, so an interrupted download never leaves a
//! half-populated model directory behind.

use crate::cache::ModelCache;
use crate::error::{Result, RmbgError};
use crate::models::{variant_file, PREPROCESSOR_CONFIG_FILE};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Environment variable holding a `HuggingFace` access token
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

/// Model downloader
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
    token: Option<String>,
}

impl ModelDownloader {
    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| RmbgError::network_error("Failed to create HTTP client", e))?;

        let token = std::env::var(HF_TOKEN_ENV).ok().filter(|t| !t.is_empty());

        Ok(Self {
            client,
            cache,
            token,
        })
    }

    /// Make sure a model variant is cached, downloading it if needed
    ///
    /// Returns the model ID.
    ///
    /// # Errors
    /// - Unsupported URL or unknown variant
    /// - Network errors during download
    /// - File system errors during caching
    /// - SHA-256 mismatch when `expected_sha256` is given
    pub async fn ensure_model(
        &self,
        url: &str,
        variant: &str,
        expected_sha256: Option<&str>,
    ) -> Result<String> {
        let model_id = ModelCache::url_to_model_id(url);
        let relative = variant_file(variant)?;
        let final_dir = self.cache.get_model_path(&model_id);

        let cached = self.cache.model_file(&model_id, variant)?;
        if cached.is_file() {
            tracing::info!(model_id = %model_id, variant, "Model already cached");
            if let Some(expected) = expected_sha256 {
                verify_sha256(&cached, expected)?;
            }
            return Ok(model_id);
        }

        if !url.starts_with("https://huggingface.co/") {
            return Err(RmbgError::invalid_config(format!(
                "Unsupported URL format: {url}. Only HuggingFace repositories are supported."
            )));
        }

        tracing::info!(url, model_id = %model_id, variant, "Downloading model");
        let temp_dir = Self::create_temp_download_dir(&model_id)?;

        match self
            .download_model_files(url, relative, &temp_dir, expected_sha256)
            .await
        {
            Ok(()) => {
                Self::merge_into_cache(&temp_dir, &final_dir)?;
                tracing::info!(model_id = %model_id, "Model downloaded");
                Ok(model_id)
            },
            Err(e) => {
                if temp_dir.exists() {
                    if let Err(cleanup_err) = fs::remove_dir_all(&temp_dir) {
                        tracing::warn!("Failed to cleanup temp directory: {}", cleanup_err);
                    }
                }
                Err(e)
            },
        }
    }

    fn create_temp_download_dir(model_id: &str) -> Result<PathBuf> {
        let temp_dir = std::env::temp_dir().join(format!(
            "rmbg-server-{}-{}",
            model_id,
            std::process::id()
        ));

        if temp_dir.exists() {
            fs::remove_dir_all(&temp_dir).map_err(|e| {
                RmbgError::file_io_error("remove existing temp directory", &temp_dir, &e)
            })?;
        }

        fs::create_dir_all(&temp_dir)
            .map_err(|e| RmbgError::file_io_error("create temp directory", &temp_dir, &e))?;

        Ok(temp_dir)
    }

    // Other variants may already be cached, so files are moved individually rather than
    // replacing the whole model directory.
    fn merge_into_cache(temp_dir: &Path, final_dir: &Path) -> Result<()> {
        for relative in [PREPROCESSOR_CONFIG_FILE, "onnx"] {
            let source = temp_dir.join(relative);
            if !source.exists() {
                continue;
            }
            if source.is_dir() {
                for entry in fs::read_dir(&source)
                    .map_err(|e| RmbgError::file_io_error("read download directory", &source, &e))?
                    .flatten()
                {
                    let target = final_dir.join(relative).join(entry.file_name());
                    move_file(&entry.path(), &target)?;
                }
            } else {
                move_file(&source, &final_dir.join(relative))?;
            }
        }

        fs::remove_dir_all(temp_dir)
            .map_err(|e| RmbgError::file_io_error("remove temp directory", temp_dir, &e))
    }

    async fn download_model_files(
        &self,
        base_url: &str,
        model_file: &str,
        download_dir: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<()> {
        let raw_base = format!("{}/resolve/main/", base_url.trim_end_matches('/'));

        // The preprocessor config is optional; defaults are used without it
        let preprocessor_url = format!("{raw_base}{PREPROCESSOR_CONFIG_FILE}");
        if let Err(e) = self
            .download_file(&preprocessor_url, &download_dir.join(PREPROCESSOR_CONFIG_FILE))
            .await
        {
            tracing::warn!("Failed to download {}: {}", PREPROCESSOR_CONFIG_FILE, e);
        }

        let model_url = format!("{raw_base}{model_file}");
        let local_model = download_dir.join(model_file);
        let digest = self.download_file(&model_url, &local_model).await?;

        tracing::info!(sha256 = %digest, "Downloaded {}", model_file);
        match expected_sha256 {
            Some(expected) => check_digest(model_file, expected, &digest),
            None => Ok(()),
        }
    }

    /// Stream a single file to disk, returning its SHA-256 as lowercase hex
    async fn download_file(&self, url: &str, local_path: &Path) -> Result<String> {
        tracing::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RmbgError::file_io_error("create directory", parent, &e))?;
        }

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RmbgError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(RmbgError::network_error(
                format!("Failed to download {url}"),
                format!("HTTP {}", response.status()),
            ));
        }

        let total_size = response.content_length();
        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| RmbgError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];
        let mut next_report = 0u64;

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| RmbgError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| RmbgError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            if downloaded >= next_report {
                tracing::debug!(downloaded, total = ?total_size, "Download progress");
                next_report = downloaded + 16 * 1024 * 1024;
            }
        }

        file.flush()
            .await
            .map_err(|e| RmbgError::file_io_error("flush file", local_path, &e))?;

        tracing::debug!("Downloaded {} bytes to {}", downloaded, local_path.display());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn move_file(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| RmbgError::file_io_error("create directory", parent, &e))?;
    }
    // rename fails across filesystems (tmp is often tmpfs), so fall back to copy
    if fs::rename(source, target).is_err() {
        fs::copy(source, target)
            .map_err(|e| RmbgError::file_io_error("copy downloaded file to cache", target, &e))?;
        fs::remove_file(source)
            .map_err(|e| RmbgError::file_io_error("remove downloaded file", source, &e))?;
    }
    Ok(())
}

/// SHA-256 of a file on disk as lowercase hex
///
/// # Errors
/// - File unreadable
pub fn file_sha256(path: &Path) -> Result<String> {
    let contents =
        fs::read(path).map_err(|e| RmbgError::file_io_error("read file for verification", path, &e))?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fail unless the SHA-256 of `path` equals `expected` (hex, any case)
///
/// # Errors
/// - File unreadable
/// - Digest mismatch
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let digest = file_sha256(path)?;
    tracing::debug!(path = %path.display(), sha256 = %digest, "Verifying model file");
    check_digest(&path.display().to_string(), expected, &digest)
}

fn check_digest(name: &str, expected: &str, actual: &str) -> Result<()> {
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(RmbgError::model(format!(
            "Integrity check failed for {name}: expected {expected}, got {actual}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.bin");
        fs::write(&path, b"").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_merge_into_cache_keeps_existing_variants() {
        let dir = TempDir::new().unwrap();
        let final_dir = dir.path().join("cache/briaai--RMBG-1.4");
        fs::create_dir_all(final_dir.join("onnx")).unwrap();
        fs::write(final_dir.join("onnx/model_fp16.onnx"), b"fp16").unwrap();

        let temp_dir = dir.path().join("download");
        fs::create_dir_all(temp_dir.join("onnx")).unwrap();
        fs::write(temp_dir.join("onnx/model.onnx"), b"fp32").unwrap();
        fs::write(temp_dir.join(PREPROCESSOR_CONFIG_FILE), b"{}").unwrap();

        ModelDownloader::merge_into_cache(&temp_dir, &final_dir).unwrap();

        assert!(final_dir.join("onnx/model.onnx").is_file());
        assert!(final_dir.join("onnx/model_fp16.onnx").is_file());
        assert!(final_dir.join(PREPROCESSOR_CONFIG_FILE).is_file());
        assert!(!temp_dir.exists());
    }

    #[tokio::test]
    async fn test_cached_model_skips_download() {
        let dir = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(dir.path()).unwrap();
        let model_dir = cache.get_model_path("briaai--RMBG-1.4");
        fs::create_dir_all(model_dir.join("onnx")).unwrap();
        fs::write(model_dir.join("onnx/model.onnx"), b"fp32").unwrap();

        let downloader = ModelDownloader::with_cache(cache).unwrap();
        let model_id = downloader
            .ensure_model("https://huggingface.co/briaai/RMBG-1.4", "fp32", None)
            .await
            .unwrap();
        assert_eq!(model_id, "briaai--RMBG-1.4");
    }

    #[test]
    fn test_verify_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.bin");
        fs::write(&path, b"").unwrap();

        verify_sha256(
            &path,
            "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855",
        )
        .unwrap();
        let err = verify_sha256(&path, &"0".repeat(64)).unwrap_err();
        assert!(matches!(err, RmbgError::Model(_)));
    }

    #[tokio::test]
    async fn test_cached_model_with_wrong_digest_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(dir.path()).unwrap();
        let model_dir = cache.get_model_path("briaai--RMBG-1.4");
        fs::create_dir_all(model_dir.join("onnx")).unwrap();
        fs::write(model_dir.join("onnx/model.onnx"), b"tampered").unwrap();

        let downloader = ModelDownloader::with_cache(cache).unwrap();
        let err = downloader
            .ensure_model(
                "https://huggingface.co/briaai/RMBG-1.4",
                "fp32",
                Some(&"0".repeat(64)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RmbgError::Model(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_huggingface_url() {
        let dir = TempDir::new().unwrap();
        let downloader = ModelDownloader::with_cache(ModelCache::with_dir(dir.path()).unwrap()).unwrap();
        let err = downloader
            .ensure_model("https://example.com/model", "fp32", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RmbgError::InvalidConfig(_)));
    }
}
