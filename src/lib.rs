//! Model Serving API Library
//!
//! Serves trained forecasting models over HTTP: raw caller features are
//! classified, window-scaled and validated against each model's exported
//! metadata, fed to the model, and the prediction is mapped back to the
//! caller's units.

pub mod config;
pub mod features;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod types;

pub use config::AppConfig;
pub use features::{classify, FeatureLayout, FeatureMap, FeatureValue};
pub use metrics::ServingMetrics;
pub use models::{Estimator, ModelMetadata, ModelRegistry, OnnxLoader};
pub use pipeline::{run, PipelineError, PredictionResult, ValidationError};
pub use server::{router, AppState};
