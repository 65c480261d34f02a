//! HTTP API over the model registry.
//!
//! Routes:
//! - `GET  /health`
//! - `GET  /models`
//! - `GET  /model_info?model=<tag>`
//! - `GET  /api/schema?model=<tag>`
//! - `POST /api/predict`
//! - `GET  /metrics`
//!
//! Every error response carries `{"error": "<message>"}`.

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::features::{classify, FeatureMap, FeatureValue, HISTORY_PREFIX};
use crate::metrics::ServingMetrics;
use crate::models::registry::{LookupError, ModelEntry, ModelRegistry};
use crate::pipeline::{self, PipelineError};
use crate::types::{
    ErrorResponse, ExampleRequest, FeatureGroups, HealthResponse, ModelInfoResponse,
    ModelListItem, ModelListResponse, ModelQuery, PredictRequest, PredictResponse,
    SchemaResponse,
};

/// Example values offered by `/api/schema`.
const SAMPLE_VALUES: &[(&str, f64)] = &[
    ("DL_hist_t_minus_6", 5972.43),
    ("DL_hist_t_minus_5", 5676.08),
    ("DL_hist_t_minus_4", 6051.62),
    ("DL_hist_t_minus_3", 6071.67),
    ("DL_hist_t_minus_2", 5784.66),
    ("DL_hist_t_minus_1", 6240.32),
    ("DL_hist_t_minus_0", 5695.44),
    ("noise_target", -100.0),
    ("noise_other_1", -110.0),
];

/// Example value for history features outside the sample table. History must
/// be strictly positive, so the schema never suggests 0 for them.
const SAMPLE_HISTORY_FALLBACK: f64 = 6000.0;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub metrics: Arc<ServingMetrics>,
}

impl AppState {
    pub fn new(registry: ModelRegistry, metrics: Arc<ServingMetrics>) -> Self {
        Self {
            registry: Arc::new(registry),
            metrics,
        }
    }
}

/// A request failure: status code, metrics label and client-facing message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: message.into(),
        }
    }

    pub fn unsupported_media_type() -> Self {
        Self {
            status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
            kind: "bad_request",
            message: "Content-Type must be application/json.".to_string(),
        }
    }

    pub fn internal(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Raised when no model is loaded at all.
    fn registry_not_initialized() -> Self {
        Self::internal("no_models", "Model registry not initialized.")
    }

    /// Map a pipeline failure. Inference details are logged under a request
    /// id and never returned to the caller.
    fn from_pipeline(err: PipelineError, entry: &ModelEntry) -> Self {
        match err {
            PipelineError::Validation(e) => Self {
                kind: "validation",
                ..Self::bad_request(e.to_string())
            },
            PipelineError::Configuration(e) => {
                error!(model_tag = %entry.tag(), error = %e, "Model metadata is invalid");
                Self::internal(
                    "configuration",
                    format!("Model '{}' is misconfigured: {}", entry.tag(), e),
                )
            }
            PipelineError::Inference(e) => {
                let request_id = Uuid::new_v4();
                error!(
                    request_id = %request_id,
                    model_tag = %entry.tag(),
                    n_features = entry.metadata.feature_names.len(),
                    error = %e,
                    "Inference failed"
                );
                Self::internal(
                    "inference",
                    format!("Prediction failed (request id {}).", request_id),
                )
            }
        }
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Build the application router.
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::temporary("/health") }))
        .route("/health", get(health_handler))
        .route("/models", get(models_handler))
        .route("/model_info", get(model_info_handler))
        .route("/api/schema", get(schema_handler))
        .route("/api/predict", post(predict_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o.trim() == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn models_handler(State(state): State<AppState>) -> Json<ModelListResponse> {
    let models = state
        .registry
        .entries()
        .into_iter()
        .map(|entry| ModelListItem {
            model_tag: entry.tag().to_string(),
            model: entry.metadata.model.clone(),
            window_size: entry.metadata.window_size,
        })
        .collect();
    Json(ModelListResponse { models })
}

async fn model_info_handler(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
) -> Result<Json<ModelInfoResponse>, ApiError> {
    if state.registry.is_empty() {
        return Err(ApiError::registry_not_initialized());
    }
    let entry = state.registry.resolve(query.model.as_deref())?;
    Ok(Json(ModelInfoResponse {
        model_tag: entry.tag().to_string(),
        model_info: entry.metadata.raw.clone(),
    }))
}

async fn schema_handler(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
) -> Result<Json<SchemaResponse>, ApiError> {
    let entry = state.registry.resolve(query.model.as_deref())?;
    Ok(Json(build_schema(entry)))
}

/// Describe the features a model expects, with a request that would pass
/// validation. Never runs inference.
pub fn build_schema(entry: &ModelEntry) -> SchemaResponse {
    let metadata = &entry.metadata;
    let names = &metadata.feature_names;
    let layout = classify(names);
    let pick = |positions: &[usize]| -> Vec<String> {
        positions.iter().map(|&pos| names[pos].clone()).collect()
    };

    let features: BTreeMap<String, f64> = names
        .iter()
        .map(|name| (name.clone(), sample_value(name)))
        .collect();

    SchemaResponse {
        model_tag: entry.tag().to_string(),
        window_size: metadata.window_size,
        feature_names: names.clone(),
        groups: FeatureGroups {
            history: pick(&layout.history),
            noise: pick(&layout.noise),
            other: pick(&layout.other),
        },
        example_request: ExampleRequest {
            model: entry.tag().to_string(),
            features,
        },
    }
}

fn sample_value(name: &str) -> f64 {
    SAMPLE_VALUES
        .iter()
        .find(|(sample, _)| *sample == name)
        .map(|(_, value)| *value)
        .unwrap_or(if name.starts_with(HISTORY_PREFIX) {
            SAMPLE_HISTORY_FALLBACK
        } else {
            0.0
        })
}

async fn predict_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PredictResponse>, ApiError> {
    let start = Instant::now();
    match predict(&state.registry, &headers, &body) {
        Ok(response) => {
            state
                .metrics
                .record_prediction(&response.model_tag, start.elapsed());
            Ok(Json(response))
        }
        Err(err) => {
            state.metrics.record_failure(err.kind());
            Err(err)
        }
    }
}

fn predict(
    registry: &ModelRegistry,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<PredictResponse, ApiError> {
    if !is_json(headers) {
        return Err(ApiError::unsupported_media_type());
    }

    let request: PredictRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))?;

    if registry.is_empty() {
        return Err(ApiError::registry_not_initialized());
    }

    // Without a model the caller must name one: 400 rather than 404.
    let entry = registry
        .resolve(request.model.as_deref())
        .map_err(|e| match e {
            LookupError::NoDefault => ApiError::bad_request(e.to_string()),
            LookupError::NotFound(_) => ApiError::from(e),
        })?;

    let features: FeatureMap = match request.features {
        Some(Value::Object(map)) if !map.is_empty() => map
            .into_iter()
            .map(|(name, value)| (name, FeatureValue::from(value)))
            .collect(),
        Some(Value::Object(_)) | Some(Value::Null) | None => {
            return Err(ApiError::bad_request(
                "Request must include a non-empty 'features' object.",
            ))
        }
        Some(_) => return Err(ApiError::bad_request("'features' must be a JSON object.")),
    };

    let result = pipeline::run(&entry.metadata, entry.estimator.as_ref(), &features)
        .map_err(|e| ApiError::from_pipeline(e, entry))?;

    Ok(PredictResponse {
        prediction: result.y_pred,
        model_tag: entry.tag().to_string(),
    })
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or_default().trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

/// Bind and serve until Ctrl-C.
pub async fn run_server(state: AppState, config: &ServerConfig) -> anyhow::Result<()> {
    let app = router(state, &config.cors_origins);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
