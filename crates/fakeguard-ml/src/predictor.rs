//! Single-item inference over the shared feature pipeline.
//!
//! [`Predictor`] owns a [`FeaturePipeline`] and a fitted [`Classifier`], both
//! constructed once. Each call validates the request, extracts the feature
//! vector through the same pipeline the dataset builder uses, and turns the
//! class probabilities into a [`PredictionResult`] with a fixed explanation
//! rule.

use fakeguard_core::{
    argmax, Classifier, FakeguardError, PipelineConfig, PredictionResult, ProductFields, Result,
    FEATURE_DIM,
};
use serde::{Deserialize, Serialize};

use crate::forest::RandomForest;
use crate::pipeline::FeaturePipeline;

/// Probability of the genuine class above which a confident prediction is
/// explained as legitimate.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Confidence below which the prediction is explained as uncertain.
pub const UNCERTAINTY_CUTOFF: f64 = 0.6;

pub const MISSING_FIELDS_MESSAGE: &str = "Missing required input fields.";
pub const EXTRACTION_FAILED_MESSAGE: &str = "Feature extraction failed.";

pub const UNCERTAIN_EXPLANATION: &str = "Model is uncertain due to low confidence score.";
pub const LEGITIMATE_EXPLANATION: &str = "Image and metadata consistency suggests legitimacy.";
pub const COUNTERFEIT_EXPLANATION: &str =
    "Mismatch or anomalies in metadata and image features suggest counterfeit.";

/// Explain a probability vector.
///
/// Low confidence overrides everything; otherwise the genuine-class
/// probability decides between legitimacy and counterfeit.
pub fn explain(proba: &[f64]) -> &'static str {
    let confidence = proba.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if proba.is_empty() || confidence < UNCERTAINTY_CUTOFF {
        UNCERTAIN_EXPLANATION
    } else if proba[0] > DECISION_THRESHOLD {
        LEGITIMATE_EXPLANATION
    } else {
        COUNTERFEIT_EXPLANATION
    }
}

/// Round to 3 decimal places.
pub fn round_confidence(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// One prediction request as read from the process boundary. Absent and
/// `null` fields deserialize as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictRequest {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub brand: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub image_url: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl PredictRequest {
    /// All four fields must be non-empty.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            &self.title,
            &self.brand,
            &self.description,
            &self.image_url,
        ];
        if fields.iter().any(|f| f.is_empty()) {
            return Err(FakeguardError::Validation(
                MISSING_FIELDS_MESSAGE.to_string(),
            ));
        }
        Ok(())
    }

    pub fn fields(&self) -> ProductFields<'_> {
        ProductFields {
            image_url: &self.image_url,
            title: &self.title,
            brand: &self.brand,
            description: &self.description,
        }
    }
}

/// Feature pipeline plus fitted classifier.
pub struct Predictor {
    pipeline: FeaturePipeline,
    classifier: Box<dyn Classifier>,
}

impl Predictor {
    /// Pair a pipeline with a classifier.
    ///
    /// # Errors
    ///
    /// Returns [`FakeguardError::DimensionMismatch`] if the classifier was
    /// not trained on [`FEATURE_DIM`]-length vectors.
    pub fn new(pipeline: FeaturePipeline, classifier: Box<dyn Classifier>) -> Result<Self> {
        if classifier.n_features() != FEATURE_DIM {
            return Err(FakeguardError::DimensionMismatch {
                expected: FEATURE_DIM,
                got: classifier.n_features(),
            });
        }
        Ok(Self {
            pipeline,
            classifier,
        })
    }

    /// Load the embedding models and the persisted forest named by `config`.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self> {
        let forest = RandomForest::load(&config.paths.model)?;
        tracing::info!(
            model = %config.paths.model.display(),
            trees = forest.trees().len(),
            "Classifier loaded"
        );
        let pipeline = FeaturePipeline::from_config(config).await?;
        Self::new(pipeline, Box::new(forest))
    }

    /// Classify one product.
    pub async fn predict(&self, request: &PredictRequest) -> Result<PredictionResult> {
        request.validate()?;

        let features = self
            .pipeline
            .extract(request.fields())
            .await
            .ok_or_else(|| FakeguardError::FeatureExtraction(EXTRACTION_FAILED_MESSAGE.into()))?;

        let proba = self.classifier.predict_proba(features.as_slice())?;
        let prediction = self.classifier.predict(features.as_slice())?;
        let confidence = argmax(&proba).map_or(0.0, |i| proba[i]);

        tracing::debug!(prediction, confidence, "Prediction computed");

        Ok(PredictionResult {
            prediction,
            confidence: round_confidence(confidence),
            explanation: explain(&proba).to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
