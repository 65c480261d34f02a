//! ONNX Runtime backed estimators.
//!
//! Regressors exported with sklearn-onnx / onnxmltools take a single float
//! tensor of shape `[1, n_features]` and return a `[1, 1]` tensor.

use crate::models::estimator::{Estimator, EstimatorError, ExclusiveEstimator, Serialized};
use crate::models::metadata::ModelMetadata;
use crate::models::registry::EstimatorLoader;
use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// File extension of ONNX model artifacts.
pub const ONNX_EXTENSION: &str = "onnx";

/// Loaded ONNX regressor.
pub struct OnnxEstimator {
    /// Model tag, for logging
    name: String,
    session: Session,
    input_name: String,
    output_name: String,
    /// Row length the model was trained on
    n_features: usize,
}

impl OnnxEstimator {
    /// Load an ONNX model from file.
    pub fn load<P: AsRef<Path>>(
        path: P,
        name: &str,
        n_features: usize,
        onnx_threads: usize,
    ) -> Result<Self> {
        let path = path.as_ref();

        info!(model = %name, path = %path.display(), threads = onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "variable".to_string());

        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            n_features = n_features,
            "Model loaded successfully"
        );

        Ok(Self {
            name: name.to_string(),
            session,
            input_name,
            output_name,
            n_features,
        })
    }
}

impl ExclusiveEstimator for OnnxEstimator {
    fn predict_mut(&mut self, row: &[f64]) -> Result<f64, EstimatorError> {
        if row.len() != self.n_features {
            return Err(EstimatorError::InputShape {
                expected: self.n_features,
                actual: row.len(),
            });
        }

        // Prepare input tensor - shape [1, num_features]
        let features: Vec<f32> = row.iter().map(|&v| v as f32).collect();
        let shape = vec![1_i64, features.len() as i64];
        let input_tensor = Tensor::from_array((shape, features)).map_err(backend_error)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(backend_error)?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or(EstimatorError::EmptyOutput)?;

        // Float exports are the norm; double-precision exports also exist.
        let value = if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
            data.first().map(|&v| v as f64)
        } else {
            let (_, data) = output.try_extract_tensor::<f64>().map_err(backend_error)?;
            data.first().copied()
        };

        let value = value.ok_or(EstimatorError::EmptyOutput)?;
        debug!(model = %self.name, y_pred_scaled = value, "ONNX inference complete");
        Ok(value)
    }
}

fn backend_error(e: ort::Error) -> EstimatorError {
    EstimatorError::Backend(e.to_string())
}

/// Loads `<tag>.onnx` artifacts as serialized ONNX Runtime sessions.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    /// Intra-op threads per session
    onnx_threads: usize,
}

impl OnnxLoader {
    pub fn new(onnx_threads: usize) -> Self {
        Self {
            onnx_threads: onnx_threads.max(1),
        }
    }
}

impl Default for OnnxLoader {
    fn default() -> Self {
        Self::new(1)
    }
}

impl EstimatorLoader for OnnxLoader {
    fn extension(&self) -> &str {
        ONNX_EXTENSION
    }

    fn load(&self, path: &Path, metadata: &ModelMetadata) -> Result<Arc<dyn Estimator>> {
        let estimator = OnnxEstimator::load(
            path,
            &metadata.tag,
            metadata.feature_names.len(),
            self.onnx_threads,
        )?;
        // Session::run needs &mut, so calls per model are serialized.
        Ok(Arc::new(Serialized::new(estimator)))
    }
}
