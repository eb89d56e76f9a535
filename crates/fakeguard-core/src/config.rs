//! YAML configuration for the fakeguard pipeline.
//!
//! Every section and key is optional; anything missing falls back to the
//! defaults below, which reproduce the reference pipeline (ResNet-50 image
//! embedding, MiniLM sentence embedding, 70/30 split with seed 42, 100-tree
//! forest with seed 42).
//!
//! # Example
//!
//! ```yaml
//! paths:
//!   dataset: "data/product_samples.json"
//!   feature_dir: "data/features"
//!   model: "ml/counterfeit_classifier.json"
//! image:
//!   fetch_timeout_ms: 5000
//! split:
//!   test_fraction: 0.25
//! forest:
//!   n_estimators: 200
//! ```

use crate::{FakeguardError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// File locations.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Image embedding model.
    #[serde(default)]
    pub image: ImageModelConfig,
    /// Metadata (text) embedding model.
    #[serde(default)]
    pub metadata: MetadataModelConfig,
    /// Train/test split.
    #[serde(default)]
    pub split: SplitConfig,
    /// Random forest hyperparameters.
    #[serde(default)]
    pub forest: ForestConfig,
    /// Local cache directory for downloaded model weights. Uses the
    /// HuggingFace default when unset.
    #[serde(default)]
    pub cache_dir: Option<String>,
}

/// File locations used by the offline tools and the predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// JSON array of samples.
    #[serde(default = "default_dataset_path")]
    pub dataset: PathBuf,
    /// Directory for per-sample and aggregate feature files.
    #[serde(default = "default_feature_dir")]
    pub feature_dir: PathBuf,
    /// Persisted classifier.
    #[serde(default = "default_model_path")]
    pub model: PathBuf,
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("data/product_samples.json")
}

fn default_feature_dir() -> PathBuf {
    PathBuf::from("data/features")
}

fn default_model_path() -> PathBuf {
    PathBuf::from("ml/counterfeit_classifier.json")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dataset: default_dataset_path(),
            feature_dir: default_feature_dir(),
            model: default_model_path(),
        }
    }
}

/// Image embedding model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageModelConfig {
    /// HuggingFace repository holding the ResNet weights.
    #[serde(default = "default_image_model_id")]
    pub model_id: String,
    /// Weights file inside the repository.
    #[serde(default = "default_image_weights_file")]
    pub weights_file: String,
    /// Side of the square input the network expects.
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    /// Total timeout for fetching one image.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// TCP connect timeout for image fetches.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_image_model_id() -> String {
    "lmz/candle-resnet".to_string()
}

fn default_image_weights_file() -> String {
    "resnet50.safetensors".to_string()
}

fn default_image_size() -> u32 {
    224
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for ImageModelConfig {
    fn default() -> Self {
        Self {
            model_id: default_image_model_id(),
            weights_file: default_image_weights_file(),
            image_size: default_image_size(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Sentence encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataModelConfig {
    /// HuggingFace model ID.
    #[serde(default = "default_metadata_model_id")]
    pub model_id: String,
    /// Token limit; longer texts are truncated.
    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,
    /// L2-normalise the pooled embedding.
    #[serde(default = "default_true")]
    pub normalize: bool,
}

fn default_metadata_model_id() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_max_sequence_length() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Default for MetadataModelConfig {
    fn default() -> Self {
        Self {
            model_id: default_metadata_model_id(),
            max_sequence_length: default_max_sequence_length(),
            normalize: true,
        }
    }
}

/// Train/test split settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of rows assigned to the test partition, in `(0, 1)`.
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    /// Shuffle seed.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Preserve class ratios in both partitions.
    #[serde(default)]
    pub stratify: bool,
}

fn default_test_fraction() -> f64 {
    0.3
}

fn default_seed() -> u64 {
    42
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
            seed: default_seed(),
            stratify: false,
        }
    }
}

/// Number of candidate features examined at each split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// `sqrt(n_features)`, rounded down, at least 1.
    Sqrt,
    /// `log2(n_features)`, rounded down, at least 1.
    Log2,
    /// Every feature.
    All,
    /// A fixed count, clamped to `[1, n_features]`.
    Count(usize),
}

impl MaxFeatures {
    /// Resolve to a concrete count for `n_features` columns.
    #[must_use]
    pub fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            Self::Sqrt => (n_features as f64).sqrt().floor() as usize,
            Self::Log2 => (n_features as f64).log2().floor() as usize,
            Self::All => n_features,
            Self::Count(k) => k,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Random forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees.
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    /// Base seed; tree `i` uses `seed + i`.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Maximum tree depth; unlimited when unset.
    #[serde(default)]
    pub max_depth: Option<usize>,
    /// Minimum samples required to split a node.
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,
    /// Minimum samples in each child of a split.
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    /// Candidate features per split.
    #[serde(default = "default_max_features")]
    pub max_features: MaxFeatures,
    /// Fit each tree on a bootstrap resample.
    #[serde(default = "default_true")]
    pub bootstrap: bool,
}

fn default_n_estimators() -> usize {
    100
}

fn default_min_samples_split() -> usize {
    2
}

fn default_min_samples_leaf() -> usize {
    1
}

fn default_max_features() -> MaxFeatures {
    MaxFeatures::Sqrt
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            seed: default_seed(),
            max_depth: None,
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            max_features: default_max_features(),
            bootstrap: true,
        }
    }
}

impl PipelineConfig {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let f = self.split.test_fraction;
        if !(f > 0.0 && f < 1.0) {
            return Err(FakeguardError::Config(format!(
                "split.test_fraction must be in (0, 1), got {f}"
            )));
        }
        if self.forest.n_estimators == 0 {
            return Err(FakeguardError::Config(
                "forest.n_estimators must be at least 1".to_string(),
            ));
        }
        if self.forest.min_samples_split < 2 {
            return Err(FakeguardError::Config(
                "forest.min_samples_split must be at least 2".to_string(),
            ));
        }
        if self.forest.min_samples_leaf == 0 {
            return Err(FakeguardError::Config(
                "forest.min_samples_leaf must be at least 1".to_string(),
            ));
        }
        if self.image.image_size == 0 {
            return Err(FakeguardError::Config(
                "image.image_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate a [`PipelineConfig`] from a YAML file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the YAML is invalid, or a
/// value is out of range.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        FakeguardError::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    let config: PipelineConfig = serde_yaml::from_str(&contents)
        .map_err(|e| FakeguardError::Config(format!("Failed to parse config YAML: {}", e)))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper to write YAML to a temp file and return the path.
    fn write_yaml(yaml: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.paths.feature_dir, PathBuf::from("data/features"));
        assert_eq!(config.image.image_size, 224);
        assert_eq!(config.metadata.model_id, "sentence-transformers/all-MiniLM-L6-v2");
        assert!((config.split.test_fraction - 0.3).abs() < 1e-12);
        assert_eq!(config.split.seed, 42);
        assert_eq!(config.forest.n_estimators, 100);
        assert_eq!(config.forest.seed, 42);
        assert_eq!(config.forest.max_features, MaxFeatures::Sqrt);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_partial() {
        let yaml = r#"
paths:
  model: "/tmp/model.json"
image:
  fetch_timeout_ms: 2500
forest:
  n_estimators: 10
  max_features: all
"#;
        let f = write_yaml(yaml);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.paths.model, PathBuf::from("/tmp/model.json"));
        assert_eq!(config.paths.dataset, PathBuf::from("data/product_samples.json"));
        assert_eq!(config.image.fetch_timeout_ms, 2500);
        assert_eq!(config.image.weights_file, "resnet50.safetensors");
        assert_eq!(config.forest.n_estimators, 10);
        assert_eq!(config.forest.max_features, MaxFeatures::All);
        assert!(config.forest.bootstrap);
    }

    #[test]
    fn test_load_config_rejects_bad_fraction() {
        let f = write_yaml("split:\n  test_fraction: 1.5\n");
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("test_fraction"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Path::new("/nonexistent/config.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let f = write_yaml("not: [valid: yaml: {{{}}}");
        let result = load_config(f.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_max_features_resolve() {
        assert_eq!(MaxFeatures::Sqrt.resolve(2432), 49);
        assert_eq!(MaxFeatures::Log2.resolve(2432), 11);
        assert_eq!(MaxFeatures::All.resolve(7), 7);
        assert_eq!(MaxFeatures::Count(100).resolve(7), 7);
        assert_eq!(MaxFeatures::Count(0).resolve(7), 1);
        assert_eq!(MaxFeatures::Sqrt.resolve(2), 1);
    }
}
