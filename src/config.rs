//! Configuration types for the background removal service

use crate::error::{Result, RmbgError};
use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Origins allowed to call the API from a browser
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["https://rmbg.jchalabi.xyz", "https://api.jchalabi.xyz"];

/// Default model repository, downloaded on first start when not cached
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/briaai/RMBG-1.4";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = RmbgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(RmbgError::invalid_config(format!(
                "Unknown execution provider: {other}. Supported: auto, cpu, cuda, coreml"
            ))),
        }
    }
}

/// How the server process is run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServeMode {
    /// Single worker with verbose, human-readable logs
    #[default]
    Development,
    /// Multiple workers with compact logs
    Production,
}

impl std::str::FromStr for ServeMode {
    type Err = RmbgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(RmbgError::invalid_config(format!(
                "Unknown serve mode: {other}. Supported: development, production"
            ))),
        }
    }
}

/// Configuration for the HTTP service and its model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,

    /// Port to bind
    pub port: u16,

    /// Serving mode
    pub mode: ServeMode,

    /// Number of HTTP workers in production mode (0 = available parallelism)
    pub workers: usize,

    /// Origins allowed by the CORS policy
    pub allowed_origins: Vec<String>,

    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,

    /// Model to load
    pub model_spec: ModelSpec,

    /// Repository the model is downloaded from when it is not cached
    pub model_url: String,

    /// Expected SHA-256 of the downloaded model file, if pinned
    pub model_sha256: Option<String>,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            mode: ServeMode::default(),
            workers: 0,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_upload_bytes: 32 * 1024 * 1024,
            model_spec: ModelSpec::default(),
            model_url: DEFAULT_MODEL_URL.to_string(),
            model_sha256: None,
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rmbg_server::config::{ServeMode, ServerConfig};
    ///
    /// let config = ServerConfig::builder()
    ///     .port(8080)
    ///     .mode(ServeMode::Production)
    ///     .workers(4)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.effective_workers(), 4);
    /// ```
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Port is zero
    /// - Upload limit is zero
    /// - An allowed origin is not an http(s) origin
    /// - Model SHA-256 is not 64 hex characters
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(RmbgError::config_value_error("port", self.port, "1-65535"));
        }

        if self.max_upload_bytes == 0 {
            return Err(RmbgError::config_value_error(
                "max upload bytes",
                self.max_upload_bytes,
                ">= 1",
            ));
        }

        if let Some(origin) = self
            .allowed_origins
            .iter()
            .find(|origin| !(origin.starts_with("https://") || origin.starts_with("http://")))
        {
            return Err(RmbgError::invalid_config(format!(
                "Allowed origin must start with http:// or https://: {origin}"
            )));
        }

        if let Some(hash) = &self.model_sha256 {
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(RmbgError::invalid_config(format!(
                    "Model SHA-256 must be 64 hex characters: {hash}"
                )));
            }
        }

        Ok(())
    }

    /// Socket address string to bind
    #[must_use]
    pub fn bind_address(&self) -> String {
        match self.host.parse::<std::net::IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }

    /// Worker count actually used for the configured mode
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        match self.mode {
            ServeMode::Development => 1,
            ServeMode::Production if self.workers > 0 => self.workers,
            ServeMode::Production => std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(4),
        }
    }
}

/// Builder for `ServerConfig`
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: ServeMode) -> Self {
        self.config.mode = mode;
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Replace the allowed CORS origins
    #[must_use]
    pub fn allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn model_url(mut self, url: impl Into<String>) -> Self {
        self.config.model_url = url.into();
        self
    }

    #[must_use]
    pub fn model_sha256(mut self, hash: Option<String>) -> Self {
        self.config.model_sha256 = hash.map(|h| h.to_ascii_lowercase());
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    /// Set both intra-op and inter-op thread counts (0 = auto)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`ServerConfig::validate`]
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.mode, ServeMode::Development);
        assert_eq!(config.allowed_origins.len(), 2);
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
    }

    #[test]
    fn test_execution_provider_parsing() {
        assert_eq!("auto".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::Auto);
        assert_eq!("CUDA".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::Cuda);
        assert_eq!("coreml".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::CoreMl);
        assert!("tpu".parse::<ExecutionProvider>().is_err());
        assert_eq!(ExecutionProvider::CoreMl.to_string(), "coreml");
    }

    #[test]
    fn test_serve_mode_parsing() {
        assert_eq!("production".parse::<ServeMode>().unwrap(), ServeMode::Production);
        assert_eq!("dev".parse::<ServeMode>().unwrap(), ServeMode::Development);
        assert!("staging".parse::<ServeMode>().is_err());
    }

    #[test]
    fn test_effective_workers() {
        let config = ServerConfig::builder().workers(8).build().unwrap();
        assert_eq!(config.effective_workers(), 1);

        let config = ServerConfig::builder()
            .mode(ServeMode::Production)
            .workers(8)
            .build()
            .unwrap();
        assert_eq!(config.effective_workers(), 8);

        let config = ServerConfig::builder()
            .mode(ServeMode::Production)
            .build()
            .unwrap();
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_validation_failures() {
        assert!(ServerConfig::builder().port(0).build().is_err());
        assert!(ServerConfig::builder().max_upload_bytes(0).build().is_err());
        assert!(ServerConfig::builder()
            .allowed_origins(["rmbg.example.com"])
            .build()
            .is_err());
        assert!(ServerConfig::builder()
            .model_sha256(Some("abc".to_string()))
            .build()
            .is_err());
        assert!(ServerConfig::builder()
            .model_sha256(Some("A".repeat(64)))
            .build()
            .is_ok());
    }

    #[test]
    fn test_num_threads() {
        let config = ServerConfig::builder().num_threads(8).build().unwrap();
        assert_eq!(config.intra_threads, 8);
        assert_eq!(config.inter_threads, 4);

        let config = ServerConfig::builder().num_threads(1).build().unwrap();
        assert_eq!(config.inter_threads, 1);
    }

    #[test]
    fn test_bind_address_with_hostname() {
        let config = ServerConfig::builder().host("localhost").port(8080).build().unwrap();
        assert_eq!(config.bind_address(), "localhost:8080");

        let config = ServerConfig::builder().host("::1").port(8080).build().unwrap();
        assert_eq!(config.bind_address(), "[::1]:8080");
    }
}
