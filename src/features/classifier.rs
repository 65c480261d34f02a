//! Feature name classification.
//!
//! Every name in a model's `feature_names` belongs to exactly one group,
//! decided by naming convention:
//!
//! - **history**: `DL_hist_<...>_<n>`, past values of the target, where the
//!   trailing integer `n` orders the window.
//! - **noise**: `noise_<...>`, raw decibel magnitudes.
//! - **other**: everything else, passed through unscaled.

/// Prefix marking a history (past target value) feature.
pub const HISTORY_PREFIX: &str = "DL_hist_";

/// Prefix marking a noise (dB magnitude) feature.
pub const NOISE_PREFIX: &str = "noise_";

/// Group a feature name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureGroup {
    History,
    Noise,
    Other,
}

impl FeatureGroup {
    /// Classify a single feature name.
    pub fn of(name: &str) -> Self {
        if name.starts_with(HISTORY_PREFIX) {
            FeatureGroup::History
        } else if name.starts_with(NOISE_PREFIX) {
            FeatureGroup::Noise
        } else {
            FeatureGroup::Other
        }
    }
}

/// Positions of each feature group within a model's `feature_names`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureLayout {
    /// History positions, sorted ascending by recency suffix. Declared order
    /// when any suffix failed to parse (see `suffixes_parsed`).
    pub history: Vec<usize>,
    /// Noise positions in declared order.
    pub noise: Vec<usize>,
    /// Remaining positions in declared order.
    pub other: Vec<usize>,
    /// `false` when at least one history name had no integer suffix and the
    /// declared order was kept.
    pub suffixes_parsed: bool,
}

impl FeatureLayout {
    /// The history positions actually fed with caller values: the first
    /// `window_size` ordered positions.
    ///
    /// When the model declares more history features than `window_size`, the
    /// surplus positions keep a zero slot in the input vector.
    pub fn selected_history(&self, window_size: usize) -> &[usize] {
        &self.history[..window_size.min(self.history.len())]
    }

    /// Whether the number of detected history features equals `window_size`.
    pub fn history_matches_window(&self, window_size: usize) -> bool {
        self.history.len() == window_size
    }

    /// Total number of classified positions.
    pub fn len(&self) -> usize {
        self.history.len() + self.noise.len() + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition `feature_names` into history, noise and other positions.
///
/// History positions are ordered by their trailing integer suffix. If any
/// history name lacks a parsable suffix the declared order is kept instead of
/// failing.
pub fn classify<S: AsRef<str>>(feature_names: &[S]) -> FeatureLayout {
    let mut history = Vec::new();
    let mut noise = Vec::new();
    let mut other = Vec::new();

    for (position, name) in feature_names.iter().enumerate() {
        match FeatureGroup::of(name.as_ref()) {
            FeatureGroup::History => history.push(position),
            FeatureGroup::Noise => noise.push(position),
            FeatureGroup::Other => other.push(position),
        }
    }

    let (history, suffixes_parsed) = match order_history(feature_names, &history) {
        Some(ordered) => (ordered, true),
        None => (history, false),
    };

    FeatureLayout {
        history,
        noise,
        other,
        suffixes_parsed,
    }
}

/// Sort history positions by recency suffix. `None` if any suffix is not an
/// integer.
fn order_history<S: AsRef<str>>(feature_names: &[S], positions: &[usize]) -> Option<Vec<usize>> {
    let mut keyed = positions
        .iter()
        .map(|&pos| recency_suffix(feature_names[pos].as_ref()).map(|suffix| (suffix, pos)))
        .collect::<Option<Vec<(i64, usize)>>>()?;

    // Stable: equal suffixes keep their declared order.
    keyed.sort_by_key(|&(suffix, _)| suffix);
    Some(keyed.into_iter().map(|(_, pos)| pos).collect())
}

/// Integer after the last `_` of a feature name.
fn recency_suffix(name: &str) -> Option<i64> {
    name.rsplit('_').next()?.trim().parse().ok()
}
