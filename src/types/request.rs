//! HTTP request payloads

use serde::Deserialize;
use serde_json::Value;

/// Body of `POST /api/predict`.
///
/// ```json
/// {
///   "model": "RandomForestRegressor_win07",
///   "features": {
///     "DL_hist_t_minus_1": 6240.32,
///     "DL_hist_t_minus_0": 5695.44,
///     "noise_target": -100.0
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    /// Model tag; the configured default is used when omitted
    #[serde(default)]
    pub model: Option<String>,

    /// Feature name → value. Kept as raw JSON so a non-object can be reported
    /// with a precise message instead of a generic parse error.
    #[serde(default)]
    pub features: Option<Value>,
}

/// `?model=<tag>` query parameter shared by the metadata routes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelQuery {
    pub model: Option<String>,
}
