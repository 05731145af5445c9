//! Tracing subscriber configuration
//!
//! Only the binary installs a subscriber; library code emits events through `tracing` and
//! the `log` facade, which is bridged into the same subscriber.

use crate::config::ServeMode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors
    Console,
    /// Compact console output without colors
    Compact,
    /// JSON structured logging for log collectors
    #[cfg(feature = "tracing-json")]
    Json,
}

impl std::str::FromStr for TracingFormat {
    type Err = crate::error::RmbgError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "console" | "pretty" => Ok(Self::Console),
            "compact" => Ok(Self::Compact),
            #[cfg(feature = "tracing-json")]
            "json" => Ok(Self::Json),
            other => Err(crate::error::RmbgError::invalid_config(format!(
                "Unknown log format: {other}"
            ))),
        }
    }
}

/// Tracing configuration builder
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Verbosity level added on top of the mode's default level
    pub verbosity: u8,
    /// Output format
    pub format: TracingFormat,
    /// Serving mode, which picks the default level
    pub mode: ServeMode,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_mode(ServeMode::default())
    }
}

impl TracingConfig {
    /// Defaults for a serving mode: colored debug output in development, compact info
    /// output in production
    #[must_use]
    pub fn for_mode(mode: ServeMode) -> Self {
        let format = match mode {
            ServeMode::Development => TracingFormat::Console,
            ServeMode::Production => TracingFormat::Compact,
        };
        Self {
            verbosity: 0,
            format,
            mode,
            env_filter: None,
        }
    }

    /// Set verbosity level (0-2+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set custom environment filter
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directive derived from mode and verbosity
    ///
    /// Dependencies stay at `info` (or `warn` in production) unless `-vv` is given, so
    /// ONNX Runtime and actix internals do not flood the output.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> String {
        let base = match self.mode {
            ServeMode::Development => 1,
            ServeMode::Production => 0,
        };
        let own = match self.verbosity.saturating_add(base) {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        let deps = match (self.mode, self.verbosity) {
            (_, 2..) => "debug",
            (ServeMode::Production, _) => "warn",
            (ServeMode::Development, _) => "info",
        };
        format!("{deps},rmbg_server={own},actix_web=info")
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(env_filter) => EnvFilter::try_new(env_filter)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };

        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_level(true)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },

            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },

            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);

                registry.with(fmt_layer).try_init()?;
            },
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults() {
        let dev = TracingConfig::for_mode(ServeMode::Development);
        assert_eq!(dev.format, TracingFormat::Console);
        assert!(dev.verbosity_to_filter().contains("rmbg_server=debug"));

        let prod = TracingConfig::for_mode(ServeMode::Production);
        assert_eq!(prod.format, TracingFormat::Compact);
        assert_eq!(
            prod.verbosity_to_filter(),
            "warn,rmbg_server=info,actix_web=info"
        );
    }

    #[test]
    fn test_verbosity_levels() {
        let config = TracingConfig::for_mode(ServeMode::Production).with_verbosity(1);
        assert!(config.verbosity_to_filter().contains("rmbg_server=debug"));

        let config = TracingConfig::for_mode(ServeMode::Development).with_verbosity(2);
        assert!(config.verbosity_to_filter().starts_with("debug,rmbg_server=trace"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("compact".parse::<TracingFormat>().unwrap(), TracingFormat::Compact);
        assert_eq!("Console".parse::<TracingFormat>().unwrap(), TracingFormat::Console);
        assert!("xml".parse::<TracingFormat>().is_err());
    }

    #[test]
    fn test_env_filter_overrides() {
        let config = TracingConfig::default().with_env_filter("rmbg_server=trace");
        assert_eq!(config.env_filter.as_deref(), Some("rmbg_server=trace"));
    }
}
