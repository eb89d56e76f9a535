//! The shared feature pipeline: image embedding, metadata embedding, combine.
//!
//! [`FeaturePipeline::extract`] is the single code path that turns product
//! fields into a [`FeatureVector`]. The dataset builder and the predictor both
//! go through it, so the feature layout used for training is the one used
//! for inference.

use fakeguard_core::{
    combine, FeatureVector, ImageEmbedder, MetadataEmbedder, PipelineConfig, ProductFields, Result,
};

use crate::device::select_device;
use crate::image_embedder::ResnetImageEmbedder;
use crate::metadata_embedder::SentenceEmbedder;

/// Image embedder + metadata embedder, constructed once and reused.
pub struct FeaturePipeline {
    image: Box<dyn ImageEmbedder>,
    metadata: Box<dyn MetadataEmbedder>,
}

impl FeaturePipeline {
    /// Build a pipeline from explicit embedders.
    pub fn new(image: Box<dyn ImageEmbedder>, metadata: Box<dyn MetadataEmbedder>) -> Self {
        Self { image, metadata }
    }

    /// Load the ResNet-50 and sentence encoder models described by `config`
    /// onto the best available device.
    ///
    /// # Errors
    ///
    /// Returns an error if either model cannot be loaded.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self> {
        let device = select_device();
        let cache_dir = config.cache_dir.as_deref();

        let image = ResnetImageEmbedder::load(&config.image, cache_dir, &device).await?;
        let metadata = SentenceEmbedder::load(&config.metadata, cache_dir, &device).await?;

        Ok(Self::new(Box::new(image), Box::new(metadata)))
    }

    /// Produce the feature vector for one product, or `None` if either
    /// embedding is unavailable.
    pub async fn extract(&self, fields: ProductFields<'_>) -> Option<FeatureVector> {
        let image = self.image.embed(fields.image_url).await;

        let metadata = match self
            .metadata
            .embed(fields.title, fields.brand, fields.description)
            .await
        {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(
                    embedder = self.metadata.name(),
                    error = %e,
                    "Metadata feature extraction failed"
                );
                None
            }
        };

        combine(image, metadata)
    }

    /// Names of the underlying embedders, image first.
    pub fn embedder_names(&self) -> (&'static str, &'static str) {
        (self.image.name(), self.metadata.name())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fakeguard_core::{
        FakeguardError, ImageVector, MetadataVector, IMAGE_EMBEDDING_DIM, METADATA_EMBEDDING_DIM,
    };

    /// Returns a vector filled with the URL length, or `None` for URLs
    /// containing "broken".
    struct UrlLengthImage;

    #[async_trait]
    impl ImageEmbedder for UrlLengthImage {
        async fn embed(&self, image_url: &str) -> Option<ImageVector> {
            if image_url.contains("broken") {
                return None;
            }
            ImageVector::new(vec![image_url.len() as f32; IMAGE_EMBEDDING_DIM]).ok()
        }

        fn name(&self) -> &'static str {
            "UrlLengthImage"
        }
    }

    /// Returns a vector filled with the text length; fails on brand "ERR".
    struct TextLengthMetadata;

    #[async_trait]
    impl MetadataEmbedder for TextLengthMetadata {
        async fn embed(
            &self,
            title: &str,
            brand: &str,
            description: &str,
        ) -> Result<MetadataVector> {
            if brand == "ERR" {
                return Err(FakeguardError::Embedding("boom".to_string()));
            }
            let len = crate::metadata_embedder::compose_text(title, brand, description).len();
            MetadataVector::new(vec![-(len as f32); METADATA_EMBEDDING_DIM])
        }

        fn name(&self) -> &'static str {
            "TextLengthMetadata"
        }
    }

    fn pipeline() -> FeaturePipeline {
        FeaturePipeline::new(Box::new(UrlLengthImage), Box::new(TextLengthMetadata))
    }

    fn fields<'a>(url: &'a str, brand: &'a str) -> ProductFields<'a> {
        ProductFields {
            image_url: url,
            title: "abc",
            brand,
            description: "de",
        }
    }

    #[tokio::test]
    async fn test_extract_layout() {
        let features = pipeline().extract(fields("http://x/1", "Acme")).await.unwrap();
        assert_eq!(features.len(), IMAGE_EMBEDDING_DIM + METADATA_EMBEDDING_DIM);
        assert!(features.as_slice()[..IMAGE_EMBEDDING_DIM]
            .iter()
            .all(|&v| v == 10.0));
        // "abc Acme de".len() == 11
        assert!(features.as_slice()[IMAGE_EMBEDDING_DIM..]
            .iter()
            .all(|&v| v == -11.0));
    }

    #[tokio::test]
    async fn test_extract_image_failure_is_absence() {
        assert!(pipeline()
            .extract(fields("http://broken/1", "Acme"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_extract_metadata_failure_is_absence() {
        assert!(pipeline().extract(fields("http://x/1", "ERR")).await.is_none());
    }

    #[tokio::test]
    async fn test_extract_is_deterministic() {
        let p = pipeline();
        let a = p.extract(fields("http://x/abc", "Acme")).await.unwrap();
        let b = p.extract(fields("http://x/abc", "Acme")).await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_embedder_names() {
        assert_eq!(
            pipeline().embedder_names(),
            ("UrlLengthImage", "TextLengthMetadata")
        );
    }
}
