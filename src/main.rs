//! Model Serving API - Main Entry Point
//!
//! Loads every model found in the models directory and serves predictions
//! over HTTP.

use anyhow::Result;
use clap::Parser;
use model_serving_api::{
    config::AppConfig,
    logging,
    metrics::{MetricsReporter, ServingMetrics},
    models::{ModelRegistry, OnnxLoader},
    server::{self, AppState},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Model serving HTTP API
#[derive(Parser, Debug)]
#[command(name = "model-serving-api", about = "Serve trained forecasting models over HTTP")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "MODEL_SERVING_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };

    logging::init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_address(),
        models_dir = %config.models.models_dir,
        "Starting Model Serving API"
    );

    // Load models
    let loader = OnnxLoader::new(config.models.onnx_threads);
    let report = ModelRegistry::load_dir(
        &config.models.models_dir,
        &loader,
        config.models.default_model.clone(),
    )?;

    let registry = report.registry;
    info!(
        loaded = registry.len(),
        skipped = report.skipped.len(),
        tags = ?registry.tags(),
        "Model registry ready"
    );
    if registry.is_empty() {
        warn!("No models loaded, /api/predict will fail until models are deployed");
    }
    if let Some(tag) = registry.default_tag() {
        if registry.lookup(tag).is_none() {
            warn!(default_model = %tag, "Default model is not loaded");
        }
    }

    // Initialize metrics
    let metrics = Arc::new(ServingMetrics::new());

    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let state = AppState::new(registry, metrics.clone());
    server::run_server(state, &config.server).await?;

    info!("Model Serving API shutting down...");
    metrics.print_summary();

    Ok(())
}
