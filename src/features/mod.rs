//! Feature contract handling: classifying model feature names into groups,
//! coercing caller-supplied values, and the scaling math applied before and
//! after inference.

pub mod classifier;
pub mod scaling;
pub mod value;

pub use classifier::{classify, FeatureGroup, FeatureLayout, HISTORY_PREFIX, NOISE_PREFIX};
pub use value::{FeatureMap, FeatureValue};
