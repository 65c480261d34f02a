//! Model metadata, estimators and the model registry

pub mod estimator;
pub mod metadata;
pub mod onnx;
pub mod registry;

pub use estimator::{Estimator, EstimatorError, ExclusiveEstimator, Serialized};
pub use metadata::{ConfigurationError, ModelMetadata, NoiseScaling, WindowScaleMode};
pub use onnx::{OnnxEstimator, OnnxLoader};
pub use registry::{EstimatorLoader, LoadReport, LookupError, ModelEntry, ModelRegistry};
