//! Dataset builder: samples in, feature store out.
//!
//! Every sample goes through [`FeaturePipeline::extract`]. A sample whose
//! image or metadata embedding is unavailable is skipped entirely: no row
//! in `X`, no entry in `y`, no per-sample file.

use crate::training::store::{FeatureManifest, FeatureStore, ManifestEntry, Partition};
use fakeguard_core::{Dataset, FakeguardError, Result, Sample, FEATURE_DIM};
use fakeguard_ml::FeaturePipeline;
use std::collections::HashSet;
use std::path::Path;

const PROGRESS_INTERVAL: usize = 100;

/// Counts reported at the end of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    pub processed: usize,
    pub skipped: usize,
}

/// Read the JSON array of samples at `path`.
pub fn load_samples(path: &Path) -> Result<Vec<Sample>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        FakeguardError::Storage(format!("Failed to read dataset {}: {e}", path.display()))
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Extract and persist features for every sample, in order.
///
/// Writes one `<product_id>_features.safetensors` per processed sample, then
/// `X`, `y` and the manifest.
///
/// # Errors
///
/// Fails if no sample could be processed, two processed samples share a
/// product id, or a file cannot be written.
pub async fn build_dataset(
    samples: &[Sample],
    pipeline: &FeaturePipeline,
    store: &FeatureStore,
) -> Result<(Dataset, BuildSummary)> {
    store.ensure_dir()?;

    let mut data = Dataset::new(FEATURE_DIM);
    let mut entries: Vec<ManifestEntry> = Vec::with_capacity(samples.len());
    let mut skipped = 0usize;
    let mut written: HashSet<String> = HashSet::with_capacity(samples.len());

    for (i, sample) in samples.iter().enumerate() {
        match pipeline.extract(sample.fields()).await {
            Some(features) => {
                if !written.insert(sample.product_id.file_stem()) {
                    return Err(FakeguardError::Storage(format!(
                        "Duplicate product_id {} would overwrite {}",
                        sample.product_id,
                        store.sample_path(&sample.product_id).display()
                    )));
                }
                store.save_sample(&sample.product_id, &features)?;
                entries.push(ManifestEntry {
                    product_id: sample.product_id.clone(),
                    label: sample.label,
                    index: data.len(),
                });
                data.push(features.as_slice(), sample.label)?;
            }
            None => {
                tracing::warn!(product_id = %sample.product_id, "Skipping sample, feature extraction failed");
                skipped += 1;
            }
        }

        if (i + 1) % PROGRESS_INTERVAL == 0 {
            tracing::info!(
                done = i + 1,
                total = samples.len(),
                processed = data.len(),
                skipped,
                "Dataset build progress"
            );
        }
    }

    if data.is_empty() {
        return Err(FakeguardError::Validation(format!(
            "No samples processed successfully ({skipped} skipped)"
        )));
    }

    store.save_dataset(&data, Partition::All)?;
    store.save_manifest(&FeatureManifest::new(entries, skipped))?;

    let summary = BuildSummary {
        processed: data.len(),
        skipped,
    };
    println!(
        "Saved {} samples ({} skipped) to {}",
        summary.processed,
        summary.skipped,
        store.dir().display()
    );
    println!("  X: [{}, {}]", data.len(), data.n_features());
    println!("  y: [{}]", data.labels().len());

    Ok((data, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fakeguard_core::{
        ImageEmbedder, ImageVector, MetadataEmbedder, MetadataVector, ProductId,
        IMAGE_EMBEDDING_DIM, METADATA_EMBEDDING_DIM,
    };

    /// Absent for URLs containing "unreachable"; otherwise filled with the
    /// URL length.
    struct MockImage;

    #[async_trait]
    impl ImageEmbedder for MockImage {
        async fn embed(&self, image_url: &str) -> Option<ImageVector> {
            if image_url.contains("unreachable") {
                return None;
            }
            ImageVector::new(vec![image_url.len() as f32; IMAGE_EMBEDDING_DIM]).ok()
        }

        fn name(&self) -> &'static str {
            "MockImage"
        }
    }

    struct MockMetadata;

    #[async_trait]
    impl MetadataEmbedder for MockMetadata {
        async fn embed(&self, title: &str, _: &str, _: &str) -> Result<MetadataVector> {
            MetadataVector::new(vec![title.len() as f32; METADATA_EMBEDDING_DIM])
        }

        fn name(&self) -> &'static str {
            "MockMetadata"
        }
    }

    fn pipeline() -> FeaturePipeline {
        FeaturePipeline::new(Box::new(MockImage), Box::new(MockMetadata))
    }

    fn sample(id: &str, url: &str, label: i64) -> Sample {
        Sample {
            product_id: ProductId::from(id),
            image_path: url.to_string(),
            title: format!("title {id}"),
            brand: "Acme".to_string(),
            description: "desc".to_string(),
            label,
        }
    }

    #[tokio::test]
    async fn test_unreachable_sample_is_skipped_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        let samples = vec![
            sample("p1", "https://cdn.example.com/1.jpg", 0),
            sample("p2", "https://unreachable.example.com/2.jpg", 1),
            sample("p3", "https://cdn.example.com/3.jpg", 1),
        ];

        let (data, summary) = build_dataset(&samples, &pipeline(), &store).await.unwrap();

        assert_eq!(summary, BuildSummary { processed: 2, skipped: 1 });
        assert_eq!(data.len(), 2);
        assert_eq!(data.features().n_rows(), 2);
        assert_eq!(data.labels(), &[0, 1]);

        assert!(store.sample_path(&ProductId::from("p1")).exists());
        assert!(!store.sample_path(&ProductId::from("p2")).exists());
        assert!(store.sample_path(&ProductId::from("p3")).exists());

        let persisted = store.load_dataset(Partition::All).unwrap();
        assert_eq!(persisted, data);

        let manifest = store.load_manifest().unwrap();
        assert_eq!(manifest.total, 2);
        assert_eq!(manifest.skipped, 1);
        assert_eq!(manifest.entries[1].product_id, ProductId::from("p3"));
        assert_eq!(manifest.entries[1].index, 1);
    }

    #[tokio::test]
    async fn test_rows_match_per_sample_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        let samples = vec![
            sample("a", "https://x/1.jpg", 0),
            sample("b", "https://x/22.jpg", 1),
        ];

        let (data, _) = build_dataset(&samples, &pipeline(), &store).await.unwrap();
        for (row, s) in data.features().rows().zip(&samples) {
            let stored = store.load_sample(&s.product_id).unwrap();
            assert_eq!(row, stored.as_slice());
        }
        // Image half comes first.
        assert_eq!(data.features().row(0)[0], "https://x/1.jpg".len() as f32);
        assert_eq!(data.features().row(0)[FEATURE_DIM - 1], "title a".len() as f32);
    }

    #[tokio::test]
    async fn test_ids_differing_in_unsafe_chars_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        let samples = vec![
            sample("sku/1", "https://x/1.jpg", 0),
            sample("sku 1", "https://x/22.jpg", 1),
        ];

        let (data, summary) = build_dataset(&samples, &pipeline(), &store).await.unwrap();
        assert_eq!(summary.processed, 2);

        let files = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with("_features.safetensors")
            })
            .count();
        assert_eq!(files, 2);
        for (row, s) in data.features().rows().zip(&samples) {
            assert_eq!(row, store.load_sample(&s.product_id).unwrap().as_slice());
        }
    }

    #[tokio::test]
    async fn test_duplicate_product_id_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        let samples = vec![
            sample("dup", "https://x/1.jpg", 0),
            sample("dup", "https://x/22.jpg", 1),
        ];
        let err = build_dataset(&samples, &pipeline(), &store).await.unwrap_err();
        assert!(matches!(err, FakeguardError::Storage(_)));
        assert!(err.to_string().contains("Duplicate product_id dup"));
    }

    #[tokio::test]
    async fn test_nothing_processed_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::new(dir.path());
        let samples = vec![sample("p", "https://unreachable/1.jpg", 0)];
        assert!(build_dataset(&samples, &pipeline(), &store).await.is_err());
        assert!(!dir.path().join("X.safetensors").exists());
    }

    #[test]
    fn test_load_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.json");
        std::fs::write(
            &path,
            r#"[{"product_id": 1, "image_path": "u", "title": "t", "brand": "b", "description": "d", "label": 0}]"#,
        )
        .unwrap();
        let samples = load_samples(&path).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].product_id, ProductId::from("1"));
        assert!(load_samples(&dir.path().join("missing.json")).is_err());
    }
}
