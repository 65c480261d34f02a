//! Prediction pipeline.
//!
//! Turns a caller's flat feature map into the exact vector a model was trained
//! on, runs the estimator on that single row, and maps the model-space output
//! back to the caller's units:
//!
//! 1. classify `feature_names` into history / noise / other positions
//! 2. validate and collect the raw history window, compute the window base
//! 3. fill the vector: scaled history, min-max scaled |dB| noise, raw others
//! 4. `y_pred = estimator(x) * base`
//!
//! The function is pure: no state survives between calls, so it can be
//! invoked concurrently for any number of requests.

use crate::features::scaling::{scale_history, scale_noise_abs_db, unscale_prediction, window_base};
use crate::features::{classify, FeatureMap};
use crate::models::estimator::{Estimator, EstimatorError};
use crate::models::metadata::{ConfigurationError, ModelMetadata};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Output of one prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    /// Prediction in the caller's original units
    pub y_pred: f64,
    /// Raw estimator output (window-relative)
    pub y_pred_scaled: f64,
    /// Window base used for scaling and unscaling
    pub base: f64,
    /// Exact row fed to the estimator
    pub x_vector: Vec<f64>,
    /// Column order of `x_vector`
    pub feature_names: Vec<String>,
}

/// Caller-attributable input problems. Each variant names the feature(s) to
/// fix.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing history features: {}", format_names(.0))]
    MissingHistory(Vec<String>),
    #[error("history feature '{0}' must be numeric")]
    NonNumericHistory(String),
    #[error("history feature '{name}' must be > 0 (got {value})")]
    NonPositiveHistory { name: String, value: f64 },
    #[error("missing noise features: {}", format_names(.0))]
    MissingNoise(Vec<String>),
    #[error("feature '{0}' must be numeric")]
    NonNumeric(String),
}

impl ValidationError {
    /// Names of the offending features.
    pub fn features(&self) -> Vec<&str> {
        match self {
            ValidationError::MissingHistory(names) | ValidationError::MissingNoise(names) => {
                names.iter().map(String::as_str).collect()
            }
            ValidationError::NonNumericHistory(name)
            | ValidationError::NonNumeric(name)
            | ValidationError::NonPositiveHistory { name, .. } => vec![name.as_str()],
        }
    }
}

fn format_names(names: &[String]) -> String {
    format!("[{}]", names.join(", "))
}

/// Every way a prediction can fail.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Broken model metadata: server-side fault.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Bad request input: the caller can fix it.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The estimator itself failed.
    #[error("estimator invocation failed: {0}")]
    Inference(#[source] EstimatorError),
}

impl PipelineError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Validation(_) => "validation",
            PipelineError::Inference(_) => "inference",
        }
    }
}

/// Build the input vector for `metadata`, run `estimator`, and unscale.
pub fn run<E>(
    metadata: &ModelMetadata,
    estimator: &E,
    features: &FeatureMap,
) -> Result<PredictionResult, PipelineError>
where
    E: Estimator + ?Sized,
{
    metadata.validate()?;

    let names = &metadata.feature_names;
    let layout = classify(names);
    let history_positions = layout.selected_history(metadata.window_size);
    if history_positions.is_empty() {
        return Err(ConfigurationError::NoHistoryFeatures.into());
    }
    if !layout.suffixes_parsed {
        debug!(model_tag = %metadata.tag, "History suffixes unparsable, using declared order");
    }

    // History: all must be present, numeric and strictly positive.
    let missing: Vec<String> = history_positions
        .iter()
        .map(|&pos| &names[pos])
        .filter(|name| !features.contains_key(name.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingHistory(missing).into());
    }

    let mut history_raw = Vec::with_capacity(history_positions.len());
    for &pos in history_positions {
        let name = &names[pos];
        let value = features
            .get(name)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ValidationError::NonNumericHistory(name.clone()))?;
        if !(value > 0.0) || !value.is_finite() {
            return Err(ValidationError::NonPositiveHistory {
                name: name.clone(),
                value,
            }
            .into());
        }
        history_raw.push(value);
    }

    let mode = metadata.window_scale_mode;
    let base = window_base(&history_raw, mode);
    let history_scaled = scale_history(&history_raw, base, mode);

    let mut x = vec![0.0; names.len()];
    for (&pos, value) in history_positions.iter().zip(history_scaled) {
        x[pos] = value;
    }

    // Noise: required, scaled on |dB|.
    let missing: Vec<String> = layout
        .noise
        .iter()
        .map(|&pos| &names[pos])
        .filter(|name| !features.contains_key(name.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::MissingNoise(missing).into());
    }
    for &pos in &layout.noise {
        let name = &names[pos];
        let raw_db = features
            .get(name)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ValidationError::NonNumeric(name.clone()))?;
        x[pos] = scale_noise_abs_db(raw_db, &metadata.noise_scaling);
    }

    // Others: optional, passed through.
    for &pos in &layout.other {
        let name = &names[pos];
        if let Some(value) = features.get(name) {
            x[pos] = value
                .as_f64()
                .ok_or_else(|| ValidationError::NonNumeric(name.clone()))?;
        }
    }

    let y_pred_scaled = estimator.predict(&x).map_err(PipelineError::Inference)?;
    let y_pred = unscale_prediction(y_pred_scaled, base);

    debug!(
        model_tag = %metadata.tag,
        base = base,
        y_pred_scaled = y_pred_scaled,
        y_pred = y_pred,
        "Prediction complete"
    );

    Ok(PredictionResult {
        y_pred,
        y_pred_scaled,
        base,
        x_vector: x,
        feature_names: names.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureValue;
    use crate::models::metadata::{NoiseScaling, WindowScaleMode};
    use std::sync::Arc;
    use std::thread;

    fn metadata(names: &[&str], window_size: usize, mode: WindowScaleMode) -> ModelMetadata {
        ModelMetadata::new(
            "test_model",
            names.iter().map(|s| s.to_string()).collect(),
            window_size,
            mode,
            NoiseScaling::new(50.0, 150.0).unwrap(),
        )
        .unwrap()
    }

    fn features(pairs: &[(&str, f64)]) -> FeatureMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FeatureValue::from(*v)))
            .collect()
    }

    /// Returns the value at a fixed column.
    fn column(index: usize) -> impl Fn(&[f64]) -> Result<f64, EstimatorError> + Send + Sync {
        move |row: &[f64]| Ok(row[index])
    }

    fn constant(value: f64) -> impl Fn(&[f64]) -> Result<f64, EstimatorError> + Send + Sync {
        move |_: &[f64]| Ok(value)
    }

    #[test]
    fn test_vector_follows_feature_order_and_group_transforms() {
        let md = metadata(
            &[
                "noise_target",
                "DL_hist_t_minus_1",
                "hour",
                "DL_hist_t_minus_0",
                "noise_other_1",
            ],
            2,
            WindowScaleMode::WindowMean,
        );
        let input = features(&[
            ("DL_hist_t_minus_0", 100.0),
            ("DL_hist_t_minus_1", 300.0),
            ("noise_target", -100.0),
            ("noise_other_1", -200.0),
            ("hour", 13.0),
        ]);

        let result = run(&md, &constant(1.0), &input).unwrap();

        assert_eq!(result.x_vector.len(), md.feature_names.len());
        assert_eq!(result.feature_names, md.feature_names);
        assert_eq!(result.base, 200.0);
        assert_eq!(result.x_vector, vec![0.5, 1.5, 13.0, 0.5, 1.0]);
        assert_eq!(result.y_pred, 200.0);
    }

    #[test]
    fn test_window_anchor_scenario() {
        let md = metadata(
            &["DL_hist_t_minus_0", "DL_hist_t_minus_1", "DL_hist_t_minus_2"],
            3,
            WindowScaleMode::WindowAnchor,
        );
        let input = features(&[
            ("DL_hist_t_minus_0", 100.0),
            ("DL_hist_t_minus_1", 200.0),
            ("DL_hist_t_minus_2", 300.0),
        ]);

        let result = run(&md, &constant(0.9), &input).unwrap();

        assert_eq!(result.base, 300.0);
        assert!((result.x_vector[0] - 1.0 / 3.0).abs() < 1e-12);
        assert!((result.x_vector[1] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(result.x_vector[2], 1.0);
        assert!((result.y_pred - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_mean_round_trip() {
        let md = metadata(
            &["DL_hist_t_minus_0", "DL_hist_t_minus_1", "DL_hist_t_minus_2"],
            3,
            WindowScaleMode::WindowMean,
        );
        let input = features(&[
            ("DL_hist_t_minus_0", 5784.66),
            ("DL_hist_t_minus_1", 6240.32),
            ("DL_hist_t_minus_2", 5695.44),
        ]);

        // Identity on the last ordered (normalized) history value.
        let result = run(&md, &column(2), &input).unwrap();

        let mean = (5784.66 + 6240.32 + 5695.44) / 3.0;
        assert!((result.base - mean).abs() < 1e-9);
        assert!((result.y_pred_scaled - 5695.44 / mean).abs() < 1e-12);
        assert!((result.y_pred - 5695.44).abs() < 1e-9);
        assert!((result.y_pred / result.base - result.y_pred_scaled).abs() < 1e-12);
    }

    #[test]
    fn test_none_mode_passes_history_through() {
        let md = metadata(&["DL_hist_t_minus_0", "DL_hist_t_minus_1"], 2, WindowScaleMode::None);
        let input = features(&[("DL_hist_t_minus_0", 4.0), ("DL_hist_t_minus_1", 8.0)]);

        let result = run(&md, &column(1), &input).unwrap();

        assert_eq!(result.base, 1.0);
        assert_eq!(result.x_vector, vec![4.0, 8.0]);
        assert_eq!(result.y_pred, 8.0);
    }

    #[test]
    fn test_missing_history_names_exactly_the_absent_feature() {
        let md = metadata(
            &["noise_target", "DL_hist_t_minus_0", "DL_hist_t_minus_1"],
            2,
            WindowScaleMode::WindowMean,
        );
        let input = features(&[("noise_target", -100.0), ("DL_hist_t_minus_0", 10.0)]);

        let err = run(&md, &constant(1.0), &input).unwrap_err();
        match &err {
            PipelineError::Validation(ValidationError::MissingHistory(missing)) => {
                assert_eq!(missing, &vec!["DL_hist_t_minus_1".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), "validation");
        assert_eq!(err.to_string(), "missing history features: [DL_hist_t_minus_1]");
    }

    #[test]
    fn test_non_positive_history_rejected() {
        let md = metadata(&["DL_hist_t_minus_0", "DL_hist_t_minus_1"], 2, WindowScaleMode::WindowMean);

        for bad in [-5.0, 0.0] {
            let input = features(&[("DL_hist_t_minus_0", bad), ("DL_hist_t_minus_1", 10.0)]);
            let err = run(&md, &constant(1.0), &input).unwrap_err();
            assert!(
                matches!(
                    &err,
                    PipelineError::Validation(ValidationError::NonPositiveHistory { name, .. })
                        if name == "DL_hist_t_minus_0"
                ),
                "got {err:?}"
            );
        }
    }

    #[test]
    fn test_non_numeric_values_rejected() {
        let md = metadata(
            &["DL_hist_t_minus_0", "noise_target", "hour"],
            1,
            WindowScaleMode::WindowMean,
        );

        let mut input = features(&[("noise_target", -90.0), ("hour", 1.0)]);
        input.insert("DL_hist_t_minus_0".into(), FeatureValue::from("abc"));
        let err = run(&md, &constant(1.0), &input).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::NonNumericHistory(ref n)) if n == "DL_hist_t_minus_0"
        ));

        let mut input = features(&[("DL_hist_t_minus_0", 5.0), ("noise_target", -90.0)]);
        input.insert("hour".into(), FeatureValue::from("noon"));
        let err = run(&md, &constant(1.0), &input).unwrap_err();
        assert_eq!(
            match err {
                PipelineError::Validation(e) => e.features().iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                other => panic!("unexpected error: {other:?}"),
            },
            vec!["hour".to_string()]
        );

        let mut input = features(&[("DL_hist_t_minus_0", 5.0)]);
        input.insert("noise_target".into(), FeatureValue::from(serde_json::json!(null)));
        let err = run(&md, &constant(1.0), &input).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::NonNumeric(ref n)) if n == "noise_target"
        ));
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let md = metadata(&["DL_hist_t_minus_0", "noise_target"], 1, WindowScaleMode::WindowAnchor);
        let mut input = FeatureMap::new();
        input.insert("DL_hist_t_minus_0".into(), FeatureValue::from("250"));
        input.insert("noise_target".into(), FeatureValue::from("-100"));

        let result = run(&md, &constant(2.0), &input).unwrap();
        assert_eq!(result.x_vector, vec![1.0, 0.5]);
        assert_eq!(result.y_pred, 500.0);
    }

    #[test]
    fn test_missing_noise_rejected() {
        let md = metadata(
            &["noise_target", "noise_other_1", "DL_hist_t_minus_0"],
            1,
            WindowScaleMode::WindowMean,
        );
        let input = features(&[("DL_hist_t_minus_0", 5.0)]);

        let err = run(&md, &constant(1.0), &input).unwrap_err();
        match err {
            PipelineError::Validation(e @ ValidationError::MissingNoise(_)) => {
                assert_eq!(e.features(), vec!["noise_target", "noise_other_1"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_other_features_default_to_zero() {
        let md = metadata(&["DL_hist_t_minus_0", "hour", "weekday"], 1, WindowScaleMode::WindowMean);
        let input = features(&[("DL_hist_t_minus_0", 5.0), ("weekday", 3.0)]);

        let result = run(&md, &constant(1.0), &input).unwrap();
        assert_eq!(result.x_vector, vec![1.0, 0.0, 3.0]);
    }

    #[test]
    fn test_noise_clamp_through_pipeline() {
        let md = metadata(
            &["DL_hist_t_minus_0", "noise_a", "noise_b", "noise_c"],
            1,
            WindowScaleMode::WindowMean,
        );
        let input = features(&[
            ("DL_hist_t_minus_0", 1.0),
            ("noise_a", -200.0),
            ("noise_b", -10.0),
            ("noise_c", -100.0),
        ]);

        let result = run(&md, &constant(1.0), &input).unwrap();
        assert_eq!(&result.x_vector[1..], &[1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_unparsable_suffixes_use_declared_order() {
        let md = metadata(&["DL_hist_foo", "DL_hist_bar"], 2, WindowScaleMode::WindowAnchor);
        let input = features(&[("DL_hist_foo", 50.0), ("DL_hist_bar", 100.0)]);

        let result = run(&md, &constant(1.0), &input).unwrap();

        // Anchor is the last declared history feature.
        assert_eq!(result.base, 100.0);
        assert_eq!(result.x_vector, vec![0.5, 1.0]);
    }

    #[test]
    fn test_window_size_smaller_than_history_truncates() {
        let md = metadata(
            &["DL_hist_t_minus_2", "DL_hist_t_minus_0", "DL_hist_t_minus_1"],
            2,
            WindowScaleMode::WindowAnchor,
        );
        // t_minus_2 is outside the window and may be omitted.
        let input = features(&[("DL_hist_t_minus_0", 10.0), ("DL_hist_t_minus_1", 20.0)]);

        let result = run(&md, &constant(1.0), &input).unwrap();

        assert_eq!(result.base, 20.0);
        assert_eq!(result.x_vector, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_invalid_metadata_is_configuration_error() {
        let mut md = metadata(&["DL_hist_t_minus_0"], 1, WindowScaleMode::WindowMean);
        md.noise_scaling = NoiseScaling {
            min_abs_db: 150.0,
            max_abs_db: 50.0,
        };
        let input = features(&[("DL_hist_t_minus_0", 1.0)]);

        let err = run(&md, &constant(1.0), &input).unwrap_err();
        assert_eq!(err.kind(), "configuration");

        let mut md = metadata(&["DL_hist_t_minus_0"], 1, WindowScaleMode::WindowMean);
        md.feature_names = vec!["hour".into()];
        let err = run(&md, &constant(1.0), &input).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration(ConfigurationError::NoHistoryFeatures)
        ));
    }

    #[test]
    fn test_estimator_failure_is_inference_error() {
        let md = metadata(&["DL_hist_t_minus_0"], 1, WindowScaleMode::WindowMean);
        let input = features(&[("DL_hist_t_minus_0", 1.0)]);
        let failing = |_: &[f64]| -> Result<f64, EstimatorError> {
            Err(EstimatorError::Backend("session crashed".into()))
        };

        let err = run(&md, &failing, &input).unwrap_err();
        assert_eq!(err.kind(), "inference");
        assert!(matches!(err, PipelineError::Inference(EstimatorError::Backend(_))));
    }

    #[test]
    fn test_idempotent() {
        let md = metadata(
            &["noise_target", "DL_hist_t_minus_0", "DL_hist_t_minus_1"],
            2,
            WindowScaleMode::WindowMean,
        );
        let input = features(&[
            ("noise_target", -97.3),
            ("DL_hist_t_minus_0", 5972.43),
            ("DL_hist_t_minus_1", 5676.08),
        ]);
        let estimator = |row: &[f64]| -> Result<f64, EstimatorError> {
            Ok(row.iter().map(|v| v * 0.37).sum())
        };

        let first = run(&md, &estimator, &input).unwrap();
        let second = run(&md, &estimator, &input).unwrap();

        assert_eq!(first.x_vector, second.x_vector);
        assert_eq!(first.base.to_bits(), second.base.to_bits());
        assert_eq!(first.y_pred_scaled.to_bits(), second.y_pred_scaled.to_bits());
    }

    #[test]
    fn test_concurrent_runs_share_metadata_and_estimator() {
        let md = Arc::new(metadata(
            &["DL_hist_t_minus_0", "DL_hist_t_minus_1"],
            2,
            WindowScaleMode::WindowMean,
        ));
        let estimator: Arc<dyn Estimator> = Arc::new(column(1));

        let handles: Vec<_> = (1..=8)
            .map(|i| {
                let md = md.clone();
                let estimator = estimator.clone();
                thread::spawn(move || {
                    let input = features(&[
                        ("DL_hist_t_minus_0", i as f64),
                        ("DL_hist_t_minus_1", 3.0 * i as f64),
                    ]);
                    run(&md, estimator.as_ref(), &input).unwrap().y_pred
                })
            })
            .collect();

        for (i, handle) in (1..=8).zip(handles) {
            let y = handle.join().unwrap();
            assert!((y - 3.0 * i as f64).abs() < 1e-9);
        }
    }
}
