//! Window and noise scaling.
//!
//! These mirror the transforms applied when the models were trained. History
//! values are expressed relative to a window base, and the model's output is
//! relative to the same base, so [`unscale_prediction`] must stay the exact
//! inverse of [`scale_history`].

use crate::models::metadata::{NoiseScaling, WindowScaleMode};

/// Floor applied to the window base.
pub const MIN_WINDOW_BASE: f64 = 1e-8;

/// Base used to normalize the history window.
///
/// `history` is ordered as the model expects (ascending recency suffix); the
/// anchor mode uses its last element.
pub fn window_base(history: &[f64], mode: WindowScaleMode) -> f64 {
    let base = match mode {
        WindowScaleMode::WindowMean => history.iter().sum::<f64>() / history.len() as f64,
        WindowScaleMode::WindowAnchor => history.last().copied().unwrap_or(MIN_WINDOW_BASE),
        WindowScaleMode::None => 1.0,
    };
    // f64::max ignores NaN, so an empty window also lands on the floor.
    base.max(MIN_WINDOW_BASE)
}

/// Divide each history value by `base`. Pass-through when the mode is `none`.
pub fn scale_history(history: &[f64], base: f64, mode: WindowScaleMode) -> Vec<f64> {
    match mode {
        WindowScaleMode::None => history.to_vec(),
        WindowScaleMode::WindowMean | WindowScaleMode::WindowAnchor => {
            history.iter().map(|v| v / base).collect()
        }
    }
}

/// Min-max scale `|raw_db|` into `[0, 1]`, saturating outside the bounds.
pub fn scale_noise_abs_db(raw_db: f64, bounds: &NoiseScaling) -> f64 {
    let span = bounds.max_abs_db - bounds.min_abs_db;
    ((raw_db.abs() - bounds.min_abs_db) / span).clamp(0.0, 1.0)
}

/// Map a model-space prediction back to original units.
pub fn unscale_prediction(y_pred_scaled: f64, base: f64) -> f64 {
    y_pred_scaled * base
}
