//! The trained estimator seen as a single capability: one row in, one value
//! out.

use std::sync::Mutex;
use thiserror::Error;

/// Failure while invoking an estimator.
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("expected {expected} input features, got {actual}")]
    InputShape { expected: usize, actual: usize },
    #[error("estimator produced no output value")]
    EmptyOutput,
    #[error("estimator backend error: {0}")]
    Backend(String),
    #[error("estimator lock poisoned")]
    Poisoned,
}

/// Single-row regression inference.
///
/// Implementations must tolerate concurrent calls through `&self`. Backends
/// that need exclusive access implement [`ExclusiveEstimator`] and are wrapped
/// in [`Serialized`].
pub trait Estimator: Send + Sync {
    /// Predict the (model-space) target for one feature row.
    fn predict(&self, row: &[f64]) -> Result<f64, EstimatorError>;
}

impl<F> Estimator for F
where
    F: Fn(&[f64]) -> Result<f64, EstimatorError> + Send + Sync,
{
    fn predict(&self, row: &[f64]) -> Result<f64, EstimatorError> {
        self(row)
    }
}

/// An estimator whose inference needs `&mut self` (e.g. an ONNX Runtime
/// session).
pub trait ExclusiveEstimator: Send {
    fn predict_mut(&mut self, row: &[f64]) -> Result<f64, EstimatorError>;
}

/// Serializes calls to an [`ExclusiveEstimator`] so it can be shared across
/// request handlers. One lock per model: calls to different models still run
/// in parallel.
pub struct Serialized<E> {
    inner: Mutex<E>,
}

impl<E: ExclusiveEstimator> Serialized<E> {
    pub fn new(estimator: E) -> Self {
        Self {
            inner: Mutex::new(estimator),
        }
    }

    pub fn into_inner(self) -> Result<E, EstimatorError> {
        self.inner.into_inner().map_err(|_| EstimatorError::Poisoned)
    }
}

impl<E: ExclusiveEstimator> Estimator for Serialized<E> {
    fn predict(&self, row: &[f64]) -> Result<f64, EstimatorError> {
        let mut estimator = self.inner.lock().map_err(|_| EstimatorError::Poisoned)?;
        estimator.predict_mut(row)
    }
}
