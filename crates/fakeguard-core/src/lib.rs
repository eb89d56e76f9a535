//! Core types, traits, and errors for fakeguard
//!
//! This crate contains the foundational types shared by the embedding
//! pipeline, the offline training tools and the predictor process: product
//! samples, fixed-length embedding vectors, the labelled feature matrix, the
//! embedder/classifier interfaces and the error type.
//!
//! # Feature space
//!
//! Every product maps to one [`FeatureVector`] of [`FEATURE_DIM`] values:
//!
//! ```text
//! [ image embedding (2048) | metadata embedding (384) ]
//! ```
//!
//! The only way to build a [`FeatureVector`] from embeddings is [`combine`],
//! so the training and prediction paths cannot disagree on the layout.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub mod config;

pub use config::{
    load_config, ForestConfig, ImageModelConfig, MaxFeatures, MetadataModelConfig, PathsConfig,
    PipelineConfig, SplitConfig,
};

// ---------------------------------------------------------------------------
// Feature space dimensions
// ---------------------------------------------------------------------------

/// Length of the pooled image embedding (ResNet-50 without its final layer).
pub const IMAGE_EMBEDDING_DIM: usize = 2048;

/// Length of the sentence embedding for title, brand and description.
pub const METADATA_EMBEDDING_DIM: usize = 384;

/// Length of the combined feature vector: image first, metadata second.
pub const FEATURE_DIM: usize = IMAGE_EMBEDDING_DIM + METADATA_EMBEDDING_DIM;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type shared by all fakeguard crates.
#[derive(thiserror::Error, Debug)]
pub enum FakeguardError {
    /// A required input was missing or malformed. The message is surfaced
    /// verbatim at the predictor boundary.
    #[error("{0}")]
    Validation(String),

    /// One of the embedders did not produce a usable vector.
    #[error("{0}")]
    FeatureExtraction(String),

    /// Embedding model loading or inference failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Classifier training, inference or persistence failed.
    #[error("Model error: {0}")]
    Model(String),

    /// A vector or matrix had the wrong length.
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },

    /// Feature store read/write error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization / deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for `std::result::Result<T, FakeguardError>`.
pub type Result<T> = std::result::Result<T, FakeguardError>;

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// Product identifier. Datasets may carry either strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl ProductId {
    /// File-name-safe form of the identifier.
    ///
    /// Bytes outside `[A-Za-z0-9._-]` are percent-escaped (`%2F`), so distinct
    /// ids always give distinct stems.
    #[must_use]
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
                stem.push(char::from(byte));
            } else {
                stem.push_str(&format!("%{byte:02X}"));
            }
        }
        stem
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProductId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for ProductId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Integer(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Self(s),
            RawId::Integer(n) => Self(n.to_string()),
        })
    }
}

/// One labelled product record from the dataset file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unique product identifier; names the per-sample feature file.
    pub product_id: ProductId,
    /// Image URL (or local path).
    pub image_path: String,
    /// Listing title.
    pub title: String,
    /// Listing brand.
    pub brand: String,
    /// Listing description.
    pub description: String,
    /// Ground-truth class: 0 = genuine, 1 = counterfeit.
    pub label: i64,
}

impl Sample {
    /// Borrowed view of the fields the feature pipeline consumes.
    pub fn fields(&self) -> ProductFields<'_> {
        ProductFields {
            image_url: &self.image_path,
            title: &self.title,
            brand: &self.brand,
            description: &self.description,
        }
    }
}

/// The four inputs of the feature pipeline, shared by dataset samples and
/// ad-hoc prediction requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductFields<'a> {
    pub image_url: &'a str,
    pub title: &'a str,
    pub brand: &'a str,
    pub description: &'a str,
}

// ---------------------------------------------------------------------------
// Fixed-length vectors
// ---------------------------------------------------------------------------

macro_rules! fixed_length_vector {
    ($(#[$meta:meta])* $name:ident, $dim:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name(Vec<f32>);

        impl $name {
            /// Required length.
            pub const DIM: usize = $dim;

            /// Wrap `values`, rejecting any length other than [`Self::DIM`].
            pub fn new(values: Vec<f32>) -> Result<Self> {
                if values.len() != Self::DIM {
                    return Err(FakeguardError::DimensionMismatch {
                        expected: Self::DIM,
                        got: values.len(),
                    });
                }
                Ok(Self(values))
            }

            pub fn as_slice(&self) -> &[f32] {
                &self.0
            }

            pub fn into_inner(self) -> Vec<f32> {
                self.0
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl AsRef<[f32]> for $name {
            fn as_ref(&self) -> &[f32] {
                &self.0
            }
        }
    };
}

fixed_length_vector!(
    /// Pooled image embedding of length [`IMAGE_EMBEDDING_DIM`].
    ImageVector,
    IMAGE_EMBEDDING_DIM
);

fixed_length_vector!(
    /// Sentence embedding of length [`METADATA_EMBEDDING_DIM`].
    MetadataVector,
    METADATA_EMBEDDING_DIM
);

fixed_length_vector!(
    /// Combined feature vector of length [`FEATURE_DIM`].
    ///
    /// Built from embeddings only through [`combine`]; [`FeatureVector::new`]
    /// exists for reloading persisted vectors.
    FeatureVector,
    FEATURE_DIM
);

/// Concatenate an image embedding and a metadata embedding.
///
/// Returns `None` if either side is absent. The image embedding always
/// occupies the first [`IMAGE_EMBEDDING_DIM`] positions.
pub fn combine(
    image: Option<ImageVector>,
    metadata: Option<MetadataVector>,
) -> Option<FeatureVector> {
    let (image, metadata) = (image?, metadata?);
    let mut values = image.into_inner();
    values.reserve_exact(METADATA_EMBEDDING_DIM);
    values.extend_from_slice(metadata.as_slice());
    Some(FeatureVector(values))
}

// ---------------------------------------------------------------------------
// Feature matrix and labels
// ---------------------------------------------------------------------------

/// Row-major matrix of `f32` features with a fixed column count.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    n_cols: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    /// Empty matrix with `n_cols` columns.
    pub fn new(n_cols: usize) -> Self {
        Self {
            n_cols,
            data: Vec::new(),
        }
    }

    /// Build a matrix from flat row-major data.
    pub fn from_flat(data: Vec<f32>, n_cols: usize) -> Result<Self> {
        if n_cols == 0 {
            return Err(FakeguardError::Validation(
                "feature matrix must have at least one column".to_string(),
            ));
        }
        if data.len() % n_cols != 0 {
            return Err(FakeguardError::Validation(format!(
                "{} values do not form rows of {n_cols} columns",
                data.len()
            )));
        }
        Ok(Self { n_cols, data })
    }

    pub fn n_rows(&self) -> usize {
        if self.n_cols == 0 {
            0
        } else {
            self.data.len() / self.n_cols
        }
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Row `index`. Panics if out of range, like slice indexing.
    pub fn row(&self, index: usize) -> &[f32] {
        let start = index * self.n_cols;
        &self.data[start..start + self.n_cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.n_cols.max(1))
    }

    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// Append one row.
    pub fn push_row(&mut self, row: &[f32]) -> Result<()> {
        if row.len() != self.n_cols {
            return Err(FakeguardError::DimensionMismatch {
                expected: self.n_cols,
                got: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }
}

/// Feature matrix `X` and label vector `y`, index-aligned.
///
/// Rows and labels can only be added together through [`Dataset::push`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: FeatureMatrix,
    labels: Vec<i64>,
}

impl Dataset {
    /// Empty dataset with `n_features` columns.
    pub fn new(n_features: usize) -> Self {
        Self {
            features: FeatureMatrix::new(n_features),
            labels: Vec::new(),
        }
    }

    /// Pair an existing matrix with its labels.
    pub fn from_parts(features: FeatureMatrix, labels: Vec<i64>) -> Result<Self> {
        if features.n_rows() != labels.len() {
            return Err(FakeguardError::DimensionMismatch {
                expected: features.n_rows(),
                got: labels.len(),
            });
        }
        Ok(Self { features, labels })
    }

    /// Append one row and its label.
    pub fn push(&mut self, features: &[f32], label: i64) -> Result<()> {
        self.features.push_row(features)?;
        self.labels.push(label);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.n_cols()
    }

    pub fn features(&self) -> &FeatureMatrix {
        &self.features
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    /// Gather the rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Result<Dataset> {
        let mut out = Dataset::new(self.n_features());
        for &i in indices {
            if i >= self.len() {
                return Err(FakeguardError::Validation(format!(
                    "row index {i} out of range for dataset of {} rows",
                    self.len()
                )));
            }
            out.push(self.features.row(i), self.labels[i])?;
        }
        Ok(out)
    }

    /// Number of rows per label.
    pub fn class_counts(&self) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for &label in &self.labels {
            *counts.entry(label).or_insert(0) += 1;
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

/// Outcome of a single successful prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Predicted class label.
    pub prediction: i64,
    /// Probability of the predicted class, rounded to 3 decimals.
    pub confidence: f64,
    /// Human-readable explanation.
    pub explanation: String,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Image embedding model.
#[async_trait::async_trait]
pub trait ImageEmbedder: Send + Sync {
    /// Embed the image at `image_url`.
    ///
    /// Any fetch, decode or inference failure yields `None`; callers skip the
    /// sample instead of aborting.
    async fn embed(&self, image_url: &str) -> Option<ImageVector>;

    /// Get the embedder name.
    fn name(&self) -> &'static str;
}

/// Text embedding model for listing metadata.
#[async_trait::async_trait]
pub trait MetadataEmbedder: Send + Sync {
    /// Embed title, brand and description as one text.
    async fn embed(&self, title: &str, brand: &str, description: &str) -> Result<MetadataVector>;

    /// Get the embedder name.
    fn name(&self) -> &'static str;
}

/// Trained probabilistic classifier over feature rows.
pub trait Classifier: Send + Sync {
    /// Class labels, in the column order of [`Classifier::predict_proba`].
    fn classes(&self) -> &[i64];

    /// Number of features each row must have.
    fn n_features(&self) -> usize;

    /// Per-class probabilities for one row.
    fn predict_proba(&self, row: &[f32]) -> Result<Vec<f64>>;

    /// Most probable class for one row. Ties go to the earliest class.
    fn predict(&self, row: &[f32]) -> Result<i64> {
        let proba = self.predict_proba(row)?;
        let best = argmax(&proba)
            .ok_or_else(|| FakeguardError::Model("classifier has no classes".to_string()))?;
        self.classes()
            .get(best)
            .copied()
            .ok_or_else(|| FakeguardError::Model(format!("class index {best} out of range")))
    }
}

/// Index of the first maximum, `None` for an empty slice.
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
