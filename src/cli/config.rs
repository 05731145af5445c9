//! Conversion of parsed CLI arguments into a `ServerConfig`

use crate::cli::main_impl::Cli;
use crate::{
    cache::ModelCache,
    config::{ServerConfig, DEFAULT_MODEL_URL},
    models::{ModelSource, ModelSpec},
};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build and validate a `ServerConfig` from CLI arguments
    pub(crate) fn from_cli(cli: &Cli) -> Result<ServerConfig> {
        let (model_spec, model_url) = Self::model_from_cli(cli);

        let mut builder = ServerConfig::builder()
            .host(cli.host.clone())
            .port(cli.port)
            .mode(cli.mode)
            .workers(cli.workers)
            .max_upload_bytes(cli.max_upload_bytes)
            .model_spec(model_spec)
            .model_url(model_url)
            .model_sha256(cli.model_sha256.clone())
            .execution_provider(cli.execution_provider)
            .num_threads(cli.threads);

        if !cli.allowed_origin.is_empty() {
            builder = builder.allowed_origins(cli.allowed_origin.iter().cloned());
        }

        builder.build().context("Invalid server configuration")
    }

    /// Resolve `--model` into a model spec and the URL it would be downloaded from
    fn model_from_cli(cli: &Cli) -> (ModelSpec, String) {
        let variant = cli.variant.clone();
        match cli.model.as_deref() {
            None => (
                ModelSpec {
                    source: ModelSource::Downloaded(ModelCache::url_to_model_id(DEFAULT_MODEL_URL)),
                    variant,
                },
                DEFAULT_MODEL_URL.to_string(),
            ),
            Some(model) if model.starts_with("https://") || model.starts_with("http://") => (
                ModelSpec::parse(model, variant),
                model.trim_end_matches('/').to_string(),
            ),
            Some(model) => (ModelSpec::parse(model, variant), DEFAULT_MODEL_URL.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionProvider, ServeMode};
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rmbg-server").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_conversion() {
        let config = CliConfigBuilder::from_cli(&parse(&[])).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:5000");
        assert_eq!(config.mode, ServeMode::Development);
        assert_eq!(config.effective_workers(), 1);
        assert_eq!(config.execution_provider, ExecutionProvider::Auto);
        assert_eq!(config.allowed_origins, ServerConfig::default().allowed_origins);
        assert_eq!(config.model_spec, ModelSpec::default());
        assert_eq!(config.model_url, DEFAULT_MODEL_URL);
    }

    #[test]
    fn test_production_flags() {
        let cli = parse(&[
            "--mode",
            "prod",
            "--port",
            "8080",
            "--workers",
            "3",
            "--allowed-origin",
            "https://a.example",
            "--allowed-origin",
            "https://b.example",
            "--execution-provider",
            "cpu",
            "--threads",
            "4",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config.mode, ServeMode::Production);
        assert_eq!(config.effective_workers(), 3);
        assert_eq!(config.port, 8080);
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.inter_threads, 2);
    }

    #[test]
    fn test_model_url_argument() {
        let cli = parse(&["--model", "https://huggingface.co/briaai/RMBG-1.4/", "--variant", "quantized"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config.model_url, "https://huggingface.co/briaai/RMBG-1.4");
        assert_eq!(
            config.model_spec.source,
            ModelSource::Downloaded("briaai--RMBG-1.4".to_string())
        );
        assert_eq!(config.model_spec.variant_or_default(), "quantized");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Cli::try_parse_from(["rmbg-server", "--mode", "staging"]).is_err());
        assert!(Cli::try_parse_from(["rmbg-server", "--execution-provider", "tpu"]).is_err());

        let cli = parse(&["--allowed-origin", "rmbg.example.com"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());

        let cli = parse(&["--max-upload-bytes", "0"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }
}
