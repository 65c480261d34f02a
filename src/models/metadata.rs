//! Model metadata: the feature contract and scaling configuration a trained
//! estimator was fitted with.
//!
//! Metadata is parsed from the JSON document exported next to each model
//! artifact and validated once, when the registry is loaded.

use crate::features::FeatureGroup;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Noise bounds used when the metadata does not declare any.
pub const DEFAULT_MIN_ABS_DB: f64 = 50.0;
pub const DEFAULT_MAX_ABS_DB: f64 = 150.0;

/// Broken or incomplete model metadata. The artifact must be fixed; callers
/// cannot work around it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("metadata has no model tag (expected 'tag' or 'model_tag')")]
    MissingTag,
    #[error("metadata.feature_names is required and must be non-empty")]
    EmptyFeatureNames,
    #[error("metadata.window_size must be > 0 (got {0})")]
    InvalidWindowSize(i64),
    #[error("model metadata exposes no DL_hist_* features")]
    NoHistoryFeatures,
    #[error("noise_scaling max_abs_db ({max_abs_db}) must be greater than min_abs_db ({min_abs_db})")]
    InvalidNoiseBounds { min_abs_db: f64, max_abs_db: f64 },
    #[error("unknown window_scale_mode: '{0}'")]
    UnknownWindowScaleMode(String),
    #[error("malformed metadata: {0}")]
    Malformed(String),
}

/// How the history window is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowScaleMode {
    /// Divide by the arithmetic mean of the window.
    #[default]
    WindowMean,
    /// Divide by the last value of the ordered window.
    WindowAnchor,
    /// No scaling.
    None,
}

impl WindowScaleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowScaleMode::WindowMean => "window_mean",
            WindowScaleMode::WindowAnchor => "window_anchor",
            WindowScaleMode::None => "none",
        }
    }
}

impl FromStr for WindowScaleMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "window_mean" => Ok(WindowScaleMode::WindowMean),
            "window_anchor" => Ok(WindowScaleMode::WindowAnchor),
            "none" => Ok(WindowScaleMode::None),
            other => Err(ConfigurationError::UnknownWindowScaleMode(other.to_string())),
        }
    }
}

impl fmt::Display for WindowScaleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds for min-max scaling of absolute noise magnitudes (dB).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoiseScaling {
    pub min_abs_db: f64,
    pub max_abs_db: f64,
}

impl NoiseScaling {
    pub fn new(min_abs_db: f64, max_abs_db: f64) -> Result<Self, ConfigurationError> {
        let bounds = Self {
            min_abs_db,
            max_abs_db,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        // Also rejects NaN bounds.
        if !(self.max_abs_db > self.min_abs_db) {
            return Err(ConfigurationError::InvalidNoiseBounds {
                min_abs_db: self.min_abs_db,
                max_abs_db: self.max_abs_db,
            });
        }
        Ok(())
    }
}

impl Default for NoiseScaling {
    fn default() -> Self {
        Self {
            min_abs_db: DEFAULT_MIN_ABS_DB,
            max_abs_db: DEFAULT_MAX_ABS_DB,
        }
    }
}

/// Validated metadata for one trained model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    /// Registry key.
    pub tag: String,
    /// Estimator family (e.g. `RandomForestRegressor`); empty if unknown.
    pub model: String,
    /// Column order the estimator was trained on.
    pub feature_names: Vec<String>,
    /// Number of history features fed per request.
    pub window_size: usize,
    pub window_scale_mode: WindowScaleMode,
    pub noise_scaling: NoiseScaling,
    /// The metadata document as exported, returned verbatim by `/model_info`.
    pub raw: Value,
}

/// Wire shape of the exported metadata document. Only the fields the service
/// relies on are named; everything else stays in `ModelMetadata::raw`.
#[derive(Debug, Deserialize)]
struct MetadataDocument {
    tag: Option<String>,
    model_tag: Option<String>,
    model: Option<String>,
    feature_names: Option<Vec<String>>,
    feature_names_in: Option<Vec<String>>,
    window_size: Option<Value>,
    scaling: Option<ScalingSection>,
    window_scale_mode: Option<String>,
    noise_scaling: Option<NoiseSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ScalingSection {
    window_scale_mode: Option<String>,
    noise_scaling: Option<NoiseSection>,
}

#[derive(Debug, Default, Deserialize)]
struct NoiseSection {
    min_abs_db: Option<f64>,
    max_abs_db: Option<f64>,
}

impl ModelMetadata {
    /// Build metadata programmatically. The raw document is synthesized from
    /// the given fields.
    pub fn new(
        tag: impl Into<String>,
        feature_names: Vec<String>,
        window_size: usize,
        window_scale_mode: WindowScaleMode,
        noise_scaling: NoiseScaling,
    ) -> Result<Self, ConfigurationError> {
        let tag = tag.into();
        let raw = json!({
            "model_tag": tag,
            "feature_names": feature_names,
            "window_size": window_size,
            "scaling": {
                "window_scale_mode": window_scale_mode.as_str(),
                "noise_scaling": noise_scaling,
            },
        });
        let metadata = Self {
            tag,
            model: String::new(),
            feature_names,
            window_size,
            window_scale_mode,
            noise_scaling,
            raw,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Parse and validate an exported metadata document.
    ///
    /// Scaling settings are read from the nested `scaling` section first and
    /// fall back to top-level keys, then to defaults (`window_mean`,
    /// 50..150 dB).
    pub fn from_json(raw: Value) -> Result<Self, ConfigurationError> {
        let doc: MetadataDocument = serde_json::from_value(raw.clone())
            .map_err(|e| ConfigurationError::Malformed(e.to_string()))?;

        let tag = doc
            .tag
            .filter(|t| !t.is_empty())
            .or(doc.model_tag.filter(|t| !t.is_empty()))
            .ok_or(ConfigurationError::MissingTag)?;

        let feature_names = doc
            .feature_names
            .filter(|names| !names.is_empty())
            .or(doc.feature_names_in)
            .unwrap_or_default();

        let window_size = parse_window_size(doc.window_size.as_ref())?;
        if window_size <= 0 {
            return Err(ConfigurationError::InvalidWindowSize(window_size));
        }
        let window_size = usize::try_from(window_size)
            .map_err(|_| ConfigurationError::InvalidWindowSize(window_size))?;

        let scaling = doc.scaling.unwrap_or_default();
        let window_scale_mode = match scaling.window_scale_mode.or(doc.window_scale_mode) {
            Some(mode) => mode.parse()?,
            None => WindowScaleMode::default(),
        };
        let noise = scaling
            .noise_scaling
            .or(doc.noise_scaling)
            .unwrap_or_default();
        let noise_scaling = NoiseScaling {
            min_abs_db: noise.min_abs_db.unwrap_or(DEFAULT_MIN_ABS_DB),
            max_abs_db: noise.max_abs_db.unwrap_or(DEFAULT_MAX_ABS_DB),
        };

        let metadata = Self {
            tag,
            model: doc.model.unwrap_or_default(),
            feature_names,
            window_size,
            window_scale_mode,
            noise_scaling,
            raw,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check the invariants the prediction pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.feature_names.is_empty() {
            return Err(ConfigurationError::EmptyFeatureNames);
        }
        if self.window_size == 0 {
            return Err(ConfigurationError::InvalidWindowSize(0));
        }
        self.noise_scaling.validate()?;
        if !self
            .feature_names
            .iter()
            .any(|name| FeatureGroup::of(name) == FeatureGroup::History)
        {
            return Err(ConfigurationError::NoHistoryFeatures);
        }
        Ok(())
    }
}

/// `window_size` as exported: an integer, an integral float (`7.0`) or a
/// numeric string (`"7"`). Absent or null reads as 0.
fn parse_window_size(value: Option<&Value>) -> Result<i64, ConfigurationError> {
    let malformed =
        |v: &Value| ConfigurationError::Malformed(format!("window_size {} is not an integer", v));
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(v @ Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(i),
            None => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
                .ok_or_else(|| malformed(v)),
        },
        Some(v @ Value::String(s)) => s.trim().parse().map_err(|_| malformed(v)),
        Some(v) => Err(malformed(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_json_nested_scaling() {
        let raw = json!({
            "model_tag": "DecisionTreeRegressor_win03",
            "model": "DecisionTreeRegressor",
            "window_size": 3,
            "parameters": {"max_depth": 5},
            "feature_names": [
                "noise_target",
                "noise_other_1",
                "DL_hist_t_minus_0",
                "DL_hist_t_minus_1",
                "DL_hist_t_minus_2"
            ],
            "scaling": {
                "window_scale_mode": "window_anchor",
                "noise_scaling": {"min_abs_db": 40.0, "max_abs_db": 140.0}
            }
        });
        let md = ModelMetadata::from_json(raw.clone()).unwrap();

        assert_eq!(md.tag, "DecisionTreeRegressor_win03");
        assert_eq!(md.model, "DecisionTreeRegressor");
        assert_eq!(md.window_size, 3);
        assert_eq!(md.window_scale_mode, WindowScaleMode::WindowAnchor);
        assert_eq!(md.noise_scaling, NoiseScaling::new(40.0, 140.0).unwrap());
        assert_eq!(md.feature_names.len(), 5);
        assert_eq!(md.raw, raw);
    }

    #[test]
    fn test_from_json_top_level_scaling_and_defaults() {
        let md = ModelMetadata::from_json(json!({
            "tag": "m1",
            "feature_names_in": ["DL_hist_t_minus_0"],
            "window_size": 1,
            "window_scale_mode": "none"
        }))
        .unwrap();

        assert_eq!(md.feature_names, names(&["DL_hist_t_minus_0"]));
        assert_eq!(md.window_scale_mode, WindowScaleMode::None);
        assert_eq!(md.noise_scaling, NoiseScaling::default());

        let md = ModelMetadata::from_json(json!({
            "tag": "m2",
            "feature_names": ["DL_hist_t_minus_0"],
            "window_size": 1
        }))
        .unwrap();
        assert_eq!(md.window_scale_mode, WindowScaleMode::WindowMean);
    }

    #[test]
    fn test_nested_scaling_wins_over_top_level() {
        let md = ModelMetadata::from_json(json!({
            "tag": "m",
            "feature_names": ["DL_hist_t_minus_0"],
            "window_size": 1,
            "window_scale_mode": "none",
            "scaling": {"window_scale_mode": "window_anchor"}
        }))
        .unwrap();
        assert_eq!(md.window_scale_mode, WindowScaleMode::WindowAnchor);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let err = ModelMetadata::from_json(json!({
            "tag": "m",
            "feature_names": ["DL_hist_t_minus_0"],
            "window_size": 1,
            "scaling": {"window_scale_mode": "log"}
        }))
        .unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownWindowScaleMode("log".into()));
    }

    #[test]
    fn test_configuration_errors() {
        let base = |extra: Value| {
            let mut doc = json!({
                "tag": "m",
                "feature_names": ["noise_target", "DL_hist_t_minus_0"],
                "window_size": 1
            });
            if let (Some(doc), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
                for (k, v) in extra {
                    doc.insert(k.clone(), v.clone());
                }
            }
            ModelMetadata::from_json(doc)
        };

        assert_eq!(
            base(json!({"feature_names": []})).unwrap_err(),
            ConfigurationError::EmptyFeatureNames
        );
        assert_eq!(
            base(json!({"window_size": 0})).unwrap_err(),
            ConfigurationError::InvalidWindowSize(0)
        );
        assert_eq!(
            base(json!({"window_size": -2})).unwrap_err(),
            ConfigurationError::InvalidWindowSize(-2)
        );
        assert_eq!(
            base(json!({"feature_names": ["noise_target", "hour"]})).unwrap_err(),
            ConfigurationError::NoHistoryFeatures
        );
        assert!(matches!(
            base(json!({"noise_scaling": {"min_abs_db": 150.0, "max_abs_db": 150.0}})).unwrap_err(),
            ConfigurationError::InvalidNoiseBounds { .. }
        ));
        assert_eq!(
            base(json!({"tag": null})).unwrap_err(),
            ConfigurationError::MissingTag
        );
        assert!(matches!(
            base(json!({"feature_names": "DL_hist_t_minus_0"})).unwrap_err(),
            ConfigurationError::Malformed(_)
        ));
    }

    #[test]
    fn test_window_size_accepts_integral_float_and_string() {
        let doc = |window_size: Value| {
            json!({
                "tag": "m",
                "feature_names": ["DL_hist_t_minus_0", "DL_hist_t_minus_1"],
                "window_size": window_size
            })
        };

        assert_eq!(ModelMetadata::from_json(doc(json!(2.0))).unwrap().window_size, 2);
        assert_eq!(ModelMetadata::from_json(doc(json!("2"))).unwrap().window_size, 2);
        assert_eq!(ModelMetadata::from_json(doc(json!(" 1 "))).unwrap().window_size, 1);

        assert_eq!(
            ModelMetadata::from_json(doc(Value::Null)).unwrap_err(),
            ConfigurationError::InvalidWindowSize(0)
        );
        for bad in [json!(2.5), json!("two"), json!([2]), json!(true)] {
            assert!(matches!(
                ModelMetadata::from_json(doc(bad)).unwrap_err(),
                ConfigurationError::Malformed(_)
            ));
        }
    }

    #[test]
    fn test_new_validates() {
        let err = ModelMetadata::new(
            "m",
            names(&["DL_hist_t_minus_0"]),
            0,
            WindowScaleMode::WindowMean,
            NoiseScaling::default(),
        )
        .unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidWindowSize(0));

        let md = ModelMetadata::new(
            "m",
            names(&["DL_hist_t_minus_0"]),
            1,
            WindowScaleMode::WindowAnchor,
            NoiseScaling::default(),
        )
        .unwrap();
        assert_eq!(md.raw["scaling"]["window_scale_mode"], "window_anchor");
        assert_eq!(md.raw["scaling"]["noise_scaling"]["max_abs_db"], 150.0);
    }

    #[test]
    fn test_noise_bounds_must_increase() {
        assert!(NoiseScaling::new(50.0, 150.0).is_ok());
        assert!(NoiseScaling::new(150.0, 50.0).is_err());
        assert!(NoiseScaling::new(f64::NAN, 50.0).is_err());
    }
}
