//! Configuration management for the model serving API
//!
//! Sources, lowest to highest precedence:
//! 1. built-in defaults
//! 2. TOML file (`config/config.toml` unless another path is given)
//! 3. `MODEL_SERVING_*` environment variables, `__` separating sections
//!    (e.g. `MODEL_SERVING_SERVER__PORT=9000`)

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "MODEL_SERVING";

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for local development
    #[default]
    Pretty,
    /// One JSON object per line, for log aggregation
    Json,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
}

/// Model registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory scanned for `<tag>.json` + `<tag>.onnx` pairs
    pub models_dir: String,
    /// Tag used when a request does not name a model
    #[serde(default)]
    pub default_model: Option<String>,
    /// Intra-op threads per ONNX session (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_onnx_threads() -> usize {
    1
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error);
    /// `RUST_LOG` takes precedence when set
    pub level: String,
    /// Log format (json, pretty)
    #[serde(default)]
    pub format: LogFormat,
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between logged metrics summaries; 0 disables them
    pub report_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from the default file (if present) and environment.
    pub fn load() -> Result<Self> {
        Self::load_layered(None)
    }

    /// Load configuration from a specific file, which must exist.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_layered(Some(path.as_ref()))
    }

    fn load_layered(config_path: Option<&Path>) -> Result<Self> {
        let defaults = AppConfig::default();

        let mut builder = Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", i64::from(defaults.server.port))?
            .set_default("server.cors_origins", defaults.server.cors_origins)?
            .set_default("models.models_dir", defaults.models.models_dir)?
            .set_default("models.default_model", defaults.models.default_model)?
            .set_default("models.onnx_threads", defaults.models.onnx_threads as i64)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", "pretty")?
            .set_default(
                "metrics.report_interval_secs",
                defaults.metrics.report_interval_secs as i64,
            )?;

        builder = match config_path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        if self.models.onnx_threads == 0 {
            bail!("models.onnx_threads must be at least 1");
        }
        if self.models.models_dir.trim().is_empty() {
            bail!("models.models_dir must not be empty");
        }
        Ok(())
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                cors_origins: vec!["*".to_string()],
            },
            models: ModelsConfig {
                models_dir: "ml-models".to_string(),
                default_model: Some("RandomForestRegressor_win07".to_string()),
                onnx_threads: 1,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            metrics: MetricsConfig {
                report_interval_secs: 60,
            },
        }
    }
}
