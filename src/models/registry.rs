//! Model registry: tag → {metadata, estimator}.
//!
//! Built once at startup from a models directory and shared read-only by all
//! request handlers.

use crate::features::classify;
use crate::models::estimator::Estimator;
use crate::models::metadata::ModelMetadata;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Turns a model artifact into an estimator.
pub trait EstimatorLoader {
    /// Artifact file extension, without the dot. The artifact for tag `t` is
    /// expected at `<metadata dir>/t.<extension>`.
    fn extension(&self) -> &str;

    fn load(&self, path: &Path, metadata: &ModelMetadata) -> Result<Arc<dyn Estimator>>;
}

/// One registered model.
#[derive(Clone)]
pub struct ModelEntry {
    pub metadata: Arc<ModelMetadata>,
    pub estimator: Arc<dyn Estimator>,
}

impl ModelEntry {
    pub fn new(metadata: ModelMetadata, estimator: Arc<dyn Estimator>) -> Self {
        Self {
            metadata: Arc::new(metadata),
            estimator,
        }
    }

    pub fn tag(&self) -> &str {
        &self.metadata.tag
    }
}

impl fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEntry")
            .field("tag", &self.metadata.tag)
            .field("model", &self.metadata.model)
            .field("window_size", &self.metadata.window_size)
            .finish_non_exhaustive()
    }
}

/// A metadata file that did not produce a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedArtifact {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of scanning a models directory.
#[derive(Debug)]
pub struct LoadReport {
    pub registry: ModelRegistry,
    pub skipped: Vec<SkippedArtifact>,
}

/// Failure to resolve a requested model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no model specified and no default model configured")]
    NoDefault,
    #[error("model '{0}' not found")]
    NotFound(String),
}

/// Immutable tag → model mapping.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entries: HashMap<String, ModelEntry>,
    default_tag: Option<String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag used when a request does not name a model.
    pub fn with_default_tag(mut self, tag: Option<String>) -> Self {
        self.default_tag = tag.filter(|t| !t.is_empty());
        self
    }

    /// Register a model under its metadata tag. Returns the entry it replaced.
    pub fn insert(&mut self, entry: ModelEntry) -> Option<ModelEntry> {
        self.entries.insert(entry.tag().to_string(), entry)
    }

    pub fn lookup(&self, tag: &str) -> Option<&ModelEntry> {
        self.entries.get(tag)
    }

    /// Resolve an explicitly requested tag, or the default one.
    pub fn resolve(&self, requested: Option<&str>) -> Result<&ModelEntry, LookupError> {
        let tag = requested
            .filter(|t| !t.is_empty())
            .or(self.default_tag.as_deref())
            .ok_or(LookupError::NoDefault)?;
        self.lookup(tag)
            .ok_or_else(|| LookupError::NotFound(tag.to_string()))
    }

    pub fn default_tag(&self) -> Option<&str> {
        self.default_tag.as_deref()
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Registered entries, sorted by tag.
    pub fn entries(&self) -> Vec<&ModelEntry> {
        let mut entries: Vec<&ModelEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.tag().cmp(b.tag()));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scan `models_dir` recursively for metadata JSON files and load the
    /// estimator artifact stored next to each one.
    ///
    /// Problem artifacts are skipped and reported, never fatal. A missing
    /// directory yields an empty registry.
    pub fn load_dir<P: AsRef<Path>>(
        models_dir: P,
        loader: &dyn EstimatorLoader,
        default_tag: Option<String>,
    ) -> Result<LoadReport> {
        let models_dir = models_dir.as_ref();
        let mut registry = ModelRegistry::new().with_default_tag(default_tag);
        let mut skipped = Vec::new();

        if !models_dir.exists() {
            warn!(path = %models_dir.display(), "Models directory not found, registry is empty");
            return Ok(LoadReport { registry, skipped });
        }

        let mut metadata_files = Vec::new();
        collect_json_files(models_dir, &mut metadata_files)
            .with_context(|| format!("Failed to scan {}", models_dir.display()))?;
        // Deterministic precedence when two files declare the same tag.
        metadata_files.sort();

        for json_path in metadata_files {
            match load_artifact(&json_path, loader, &registry) {
                Ok(entry) => {
                    warn_on_layout_drift(&entry.metadata);
                    info!(
                        model_tag = %entry.tag(),
                        model = %entry.metadata.model,
                        window_size = entry.metadata.window_size,
                        features = entry.metadata.feature_names.len(),
                        "Registered model"
                    );
                    registry.insert(entry);
                }
                Err(reason) => {
                    skipped.push(SkippedArtifact {
                        path: json_path,
                        reason,
                    });
                }
            }
        }

        for skip in &skipped {
            warn!(path = %skip.path.display(), reason = %skip.reason, "Skipped model artifact");
        }

        info!(
            count = registry.len(),
            skipped = skipped.len(),
            "Loaded {} models from {}",
            registry.len(),
            models_dir.display()
        );

        Ok(LoadReport { registry, skipped })
    }
}

/// Symlinked directories are not followed.
fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

/// Load one metadata file and its estimator. The error is the skip reason.
fn load_artifact(
    json_path: &Path,
    loader: &dyn EstimatorLoader,
    registry: &ModelRegistry,
) -> std::result::Result<ModelEntry, String> {
    let text = fs::read_to_string(json_path).map_err(|e| format!("unreadable: {e}"))?;
    let raw: Value = serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {e}"))?;
    let metadata =
        ModelMetadata::from_json(raw).map_err(|e| format!("invalid metadata: {e}"))?;

    // Checked before loading so a duplicate never builds a session.
    if registry.lookup(&metadata.tag).is_some() {
        return Err(format!("duplicate model tag '{}'", metadata.tag));
    }

    // Built by hand: `with_extension` would clobber a dotted tag like `rf_v1.2`.
    let artifact = json_path.with_file_name(format!("{}.{}", metadata.tag, loader.extension()));
    if !artifact.exists() {
        return Err(format!("estimator artifact {} not found", artifact.display()));
    }

    let estimator = loader
        .load(&artifact, &metadata)
        .map_err(|e| format!("failed to load estimator: {e:#}"))?;
    Ok(ModelEntry::new(metadata, estimator))
}

fn warn_on_layout_drift(metadata: &ModelMetadata) {
    let layout = classify(&metadata.feature_names);
    if !layout.history_matches_window(metadata.window_size) {
        warn!(
            model_tag = %metadata.tag,
            history_features = layout.history.len(),
            window_size = metadata.window_size,
            "History feature count differs from window_size; only the first window_size ordered history features will be fed"
        );
    }
    if !layout.suffixes_parsed {
        warn!(
            model_tag = %metadata.tag,
            "History feature names lack integer suffixes; using declared order"
        );
    }
}
