//! Background removal HTTP server
//!
//! Parses flags and environment, makes sure the model is on disk, loads it and serves.

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache},
    config::{ExecutionProvider, ServeMode, ServerConfig},
    download::{verify_sha256, ModelDownloader},
    error::RmbgError,
    models::ModelSource,
    tracing_config::{TracingConfig, TracingFormat},
};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

/// HTTP service removing image backgrounds
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "rmbg-server")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Interface to bind
    #[arg(long, env = "RMBG_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind
    #[arg(short, long, env = "RMBG_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Serving mode (development, production; dev/prod accepted)
    #[arg(long, env = "RMBG_ENV", default_value = "development", value_parser = parse_mode)]
    pub mode: ServeMode,

    /// HTTP workers in production mode (0 = one per CPU core)
    #[arg(long, env = "RMBG_WORKERS", default_value_t = 0)]
    pub workers: usize,

    /// Origin allowed by CORS; repeat for several [default: the public frontend origins]
    #[arg(long = "allowed-origin", value_name = "ORIGIN")]
    pub allowed_origin: Vec<String>,

    /// Largest accepted upload in bytes
    #[arg(long, default_value_t = 32 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Model URL, cached model ID, or path to an .onnx file or model folder
    /// [default: https://huggingface.co/briaai/RMBG-1.4]
    #[arg(short, long, env = "RMBG_MODEL")]
    pub model: Option<String>,

    /// Model variant (fp32, fp16, quantized) [default: fp32]
    #[arg(long)]
    pub variant: Option<String>,

    /// Expected SHA-256 of the downloaded model file
    #[arg(long, value_name = "HEX")]
    pub model_sha256: Option<String>,

    /// Execution provider (auto, cpu, cuda, coreml)
    #[arg(short, long, env = "RMBG_EXECUTION_PROVIDER", default_value = "auto", value_parser = parse_provider)]
    pub execution_provider: ExecutionProvider,

    /// Number of inference threads (0 = auto-detect optimal threading)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Increase log verbosity (-v, -vv); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (console, compact, json) [default: depends on --mode]
    #[arg(long, value_parser = parse_log_format)]
    pub log_format: Option<TracingFormat>,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Download the model if needed, then exit without serving
    #[arg(long)]
    pub only_download: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,
}

fn parse_mode(value: &str) -> std::result::Result<ServeMode, RmbgError> {
    value.parse()
}

fn parse_provider(value: &str) -> std::result::Result<ExecutionProvider, RmbgError> {
    value.parse()
}

fn parse_log_format(value: &str) -> std::result::Result<TracingFormat, RmbgError> {
    value.parse()
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    if cli.list_models {
        return list_cached_models();
    }

    let config = CliConfigBuilder::from_cli(&cli)?;
    info!(
        model = %config.model_spec.source.display_name(),
        variant = config.model_spec.variant_or_default(),
        provider = %config.execution_provider,
        "Configuration loaded"
    );

    ensure_model_available(&config)
        .await
        .context("Failed to ensure model is available")?;

    if cli.only_download {
        info!("Model is available, exiting (--only-download)");
        return Ok(());
    }

    serve(config).await
}

#[cfg(feature = "onnx")]
async fn serve(config: ServerConfig) -> Result<()> {
    use crate::segmenter::ModelHandle;

    let model = ModelHandle::for_server_config(config.clone());
    // Load before binding so a broken model stops the process instead of failing requests
    model
        .get()
        .await
        .context("Failed to load segmentation model")?;

    crate::server::run(&config, model)
        .await
        .with_context(|| format!("HTTP server on {} failed", config.bind_address()))
}

#[cfg(not(feature = "onnx"))]
async fn serve(_config: ServerConfig) -> Result<()> {
    anyhow::bail!("rmbg-server was built without the onnx feature; no inference backend available")
}

/// Download the configured model into the cache when it is missing
async fn ensure_model_available(config: &ServerConfig) -> Result<()> {
    if !matches!(config.model_spec.source, ModelSource::Downloaded(_)) {
        return Ok(());
    }
    let cache = ModelCache::new().context("Failed to create model cache")?;
    ensure_model_in_cache(cache, config).await
}

async fn ensure_model_in_cache(cache: ModelCache, config: &ServerConfig) -> Result<()> {
    let ModelSource::Downloaded(model_id) = &config.model_spec.source else {
        return Ok(());
    };

    let variant = config.model_spec.variant_or_default();
    let cached = cache.model_file(model_id, variant)?;
    if cached.is_file() {
        if let Some(expected) = config.model_sha256.as_deref() {
            verify_sha256(&cached, expected)
                .with_context(|| format!("Cached model {} failed verification", cached.display()))?;
            info!(path = %cached.display(), "Cached model matches the pinned SHA-256");
        }
        return Ok(());
    }

    if *model_id != ModelCache::url_to_model_id(&config.model_url) {
        anyhow::bail!(
            "Model '{model_id}' not found in {}. Pass its URL with --model to download it, or use --list-models to see cached models.",
            cache.cache_dir().display()
        );
    }

    info!(url = %config.model_url, variant, "Model not cached, downloading");
    let downloader = ModelDownloader::with_cache(cache).context("Failed to create model downloader")?;
    downloader
        .ensure_model(
            &config.model_url,
            variant,
            config.model_sha256.as_deref(),
        )
        .await
        .with_context(|| format!("Failed to download {}", config.model_url))?;

    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let mut tracing_config = TracingConfig::for_mode(cli.mode).with_verbosity(cli.verbose);
    if let Some(format) = cli.log_format {
        tracing_config = tracing_config.with_format(format);
    }
    if let Some(filter) = std::env::var("RUST_LOG").ok().filter(|f| !f.is_empty()) {
        tracing_config = tracing_config.with_env_filter(filter);
    }
    tracing_config.init()
}

fn show_provider_diagnostics() {
    println!("🔍 Execution Provider Diagnostics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    #[cfg(feature = "onnx")]
    {
        println!("\n🚀 Execution Providers:");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available {
                "✅ Available"
            } else {
                "❌ Not Available"
            };
            println!("  • {name}: {status} - {description}");
        }
    }
    #[cfg(not(feature = "onnx"))]
    {
        warn!("Built without the onnx feature; no execution providers");
    }

    println!("\n💡 Usage Examples:");
    println!("  --execution-provider auto    # CUDA, then CoreML, then CPU (default)");
    println!("  --execution-provider cuda    # NVIDIA CUDA");
    println!("  --execution-provider coreml  # Apple CoreML (macOS)");
    println!("  --execution-provider cpu     # Force CPU execution");
}

fn list_cached_models() -> Result<()> {
    let cache = ModelCache::new().context("Failed to initialize model cache")?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("📦 Cached Models ({})", cache.cache_dir().display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if models.is_empty() {
        println!("No cached models found.");
        println!("\n💡 To download the default model, use:");
        println!("  rmbg-server --only-download");
        return Ok(());
    }

    for model in models {
        println!("📁 Model ID: {}", model.model_id);
        println!("  └─ Cache location: {}", model.path.display());
        println!("  └─ Variants: {}", model.variants.join(", "));
        println!("  └─ Size: {}", format_size(model.size_bytes));
        if !model.path.join(crate::models::PREPROCESSOR_CONFIG_FILE).is_file() {
            warn!(model = %model.model_id, "No preprocessor config, RMBG-1.4 defaults will be used");
        }
        println!();
    }

    Ok(())
}
