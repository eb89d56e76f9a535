//! Safetensors feature store.
//!
//! Layout of a feature directory:
//!
//! ```text
//! <product_id>_features.safetensors   tensor "features" [2432]      F32
//! X.safetensors                       tensor "X"        [n, 2432]   F32
//! y.safetensors                       tensor "y"        [n]         I64
//! X_train / y_train / X_test / y_test same layout
//! manifest.json                       row index -> product id, counts
//! ```

use fakeguard_core::{
    Dataset, FakeguardError, FeatureMatrix, FeatureVector, ProductId, Result, FEATURE_DIM,
    IMAGE_EMBEDDING_DIM, METADATA_EMBEDDING_DIM,
};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

const SAMPLE_TENSOR: &str = "features";
const FEATURES_TENSOR: &str = "X";
const LABELS_TENSOR: &str = "y";

/// Which aggregate arrays to read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Every processed sample, in processing order.
    All,
    Train,
    Test,
}

impl Partition {
    fn suffix(self) -> &'static str {
        match self {
            Self::All => "",
            Self::Train => "_train",
            Self::Test => "_test",
        }
    }

    pub fn features_file(self) -> String {
        format!("X{}.safetensors", self.suffix())
    }

    pub fn labels_file(self) -> String {
        format!("y{}.safetensors", self.suffix())
    }
}

/// Manifest row: which product a row of `X` came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub product_id: ProductId,
    pub label: i64,
    pub index: usize,
}

/// Summary written next to the aggregate arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureManifest {
    pub entries: Vec<ManifestEntry>,
    pub total: usize,
    pub skipped: usize,
    pub class_counts: BTreeMap<i64, usize>,
    pub image_dim: usize,
    pub metadata_dim: usize,
    pub feature_dim: usize,
}

impl FeatureManifest {
    pub fn new(entries: Vec<ManifestEntry>, skipped: usize) -> Self {
        let mut class_counts = BTreeMap::new();
        for entry in &entries {
            *class_counts.entry(entry.label).or_insert(0) += 1;
        }
        Self {
            total: entries.len(),
            entries,
            skipped,
            class_counts,
            image_dim: IMAGE_EMBEDDING_DIM,
            metadata_dim: METADATA_EMBEDDING_DIM,
            feature_dim: FEATURE_DIM,
        }
    }
}

/// Reads and writes feature arrays under one directory.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    dir: PathBuf,
}

impl FeatureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if needed.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            FakeguardError::Storage(format!(
                "Failed to create feature dir {}: {e}",
                self.dir.display()
            ))
        })
    }

    pub fn sample_path(&self, product_id: &ProductId) -> PathBuf {
        self.dir
            .join(format!("{}_features.safetensors", product_id.file_stem()))
    }

    pub fn save_sample(&self, product_id: &ProductId, features: &FeatureVector) -> Result<PathBuf> {
        let path = self.sample_path(product_id);
        write_f32(&path, SAMPLE_TENSOR, features.as_slice(), &[features.len()])?;
        Ok(path)
    }

    pub fn load_sample(&self, product_id: &ProductId) -> Result<FeatureVector> {
        let path = self.sample_path(product_id);
        let (values, _) = read_f32(&path, SAMPLE_TENSOR)?;
        FeatureVector::new(values)
    }

    /// Write `X` and `y` for `partition`.
    pub fn save_dataset(&self, data: &Dataset, partition: Partition) -> Result<()> {
        write_f32(
            &self.dir.join(partition.features_file()),
            FEATURES_TENSOR,
            data.features().as_flat(),
            &[data.len(), data.n_features()],
        )?;
        write_i64(
            &self.dir.join(partition.labels_file()),
            LABELS_TENSOR,
            data.labels(),
        )
    }

    /// Read `X` and `y` for `partition`, checking they are index-aligned.
    pub fn load_dataset(&self, partition: Partition) -> Result<Dataset> {
        let (values, shape) = read_f32(&self.dir.join(partition.features_file()), FEATURES_TENSOR)?;
        let &[n_rows, n_cols] = shape.as_slice() else {
            return Err(FakeguardError::Storage(format!(
                "{} must be 2-dimensional, got shape {shape:?}",
                partition.features_file()
            )));
        };
        let features = FeatureMatrix::from_flat(values, n_cols)?;
        let labels = read_i64(&self.dir.join(partition.labels_file()), LABELS_TENSOR)?;
        if labels.len() != n_rows {
            return Err(FakeguardError::DimensionMismatch {
                expected: n_rows,
                got: labels.len(),
            });
        }
        Dataset::from_parts(features, labels)
    }

    pub fn save_manifest(&self, manifest: &FeatureManifest) -> Result<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.dir.join(MANIFEST_FILE), json)
            .map_err(|e| FakeguardError::Storage(format!("Failed to write manifest: {e}")))
    }

    pub fn load_manifest(&self) -> Result<FeatureManifest> {
        let json = std::fs::read_to_string(self.dir.join(MANIFEST_FILE))
            .map_err(|e| FakeguardError::Storage(format!("Failed to read manifest: {e}")))?;
        Ok(serde_json::from_str(&json)?)
    }
}

// ---------------------------------------------------------------------------
// safetensors helpers
// ---------------------------------------------------------------------------

fn write_tensor(path: &Path, name: &str, dtype: Dtype, shape: &[usize], bytes: &[u8]) -> Result<()> {
    let view = TensorView::new(dtype, shape.to_vec(), bytes)
        .map_err(|e| FakeguardError::Storage(format!("TensorView create failed: {e}")))?;
    let mut tensors = HashMap::new();
    tensors.insert(name.to_string(), view);
    let serialized = safetensors::tensor::serialize(&tensors, &None)
        .map_err(|e| FakeguardError::Storage(format!("serialize {name}: {e}")))?;
    std::fs::write(path, serialized)
        .map_err(|e| FakeguardError::Storage(format!("Failed to write {}: {e}", path.display())))
}

fn write_f32(path: &Path, name: &str, data: &[f32], shape: &[usize]) -> Result<()> {
    let bytes: Vec<u8> = data.iter().flat_map(|f| f.to_le_bytes()).collect();
    write_tensor(path, name, Dtype::F32, shape, &bytes)
}

fn write_i64(path: &Path, name: &str, data: &[i64]) -> Result<()> {
    let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
    write_tensor(path, name, Dtype::I64, &[data.len()], &bytes)
}

fn read_tensor(path: &Path, name: &str, dtype: Dtype) -> Result<(Vec<u8>, Vec<usize>)> {
    let data = std::fs::read(path)
        .map_err(|e| FakeguardError::Storage(format!("Failed to read {}: {e}", path.display())))?;
    let tensors = SafeTensors::deserialize(&data).map_err(|e| {
        FakeguardError::Storage(format!("Failed to parse safetensor {}: {e}", path.display()))
    })?;
    let view = tensors.tensor(name).map_err(|e| {
        FakeguardError::Storage(format!("Tensor '{name}' not found in {}: {e}", path.display()))
    })?;
    if view.dtype() != dtype {
        return Err(FakeguardError::Storage(format!(
            "Tensor '{name}' in {} has dtype {:?}, expected {dtype:?}",
            path.display(),
            view.dtype()
        )));
    }
    Ok((view.data().to_vec(), view.shape().to_vec()))
}

fn read_f32(path: &Path, name: &str) -> Result<(Vec<f32>, Vec<usize>)> {
    let (raw, shape) = read_tensor(path, name, Dtype::F32)?;
    let values = raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((values, shape))
}

fn read_i64(path: &Path, name: &str) -> Result<Vec<i64>> {
    let (raw, _) = read_tensor(path, name, Dtype::I64)?;
    Ok(raw
        .chunks_exact(8)
        .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect())
}
