//! HTTP response payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `GET /health`
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// `POST /api/predict`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    /// Prediction in the caller's original units
    pub prediction: f64,
    /// Tag of the model that produced it
    pub model_tag: String,
}

/// Minimal description of one registered model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelListItem {
    pub model_tag: String,
    pub model: String,
    pub window_size: usize,
}

/// `GET /models`
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelListResponse {
    pub models: Vec<ModelListItem>,
}

/// `GET /model_info`
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfoResponse {
    pub model_tag: String,
    /// Metadata document exactly as exported at training time
    pub model_info: Value,
}

/// Request body a client could send for a given model.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExampleRequest {
    pub model: String,
    pub features: BTreeMap<String, f64>,
}

/// `GET /api/schema`
#[derive(Debug, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub model_tag: String,
    pub window_size: usize,
    /// Exact feature names in training order
    pub feature_names: Vec<String>,
    /// Positions of each feature group within `feature_names`
    pub groups: FeatureGroups,
    pub example_request: ExampleRequest,
}

/// Feature names split by group, history in window order.
#[derive(Debug, Serialize, Deserialize)]
pub struct FeatureGroups {
    pub history: Vec<String>,
    pub noise: Vec<String>,
    pub other: Vec<String>,
}

/// Error body for every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
