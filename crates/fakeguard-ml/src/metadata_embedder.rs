//! Listing metadata embedding with a BERT-family sentence encoder.
//!
//! Provides [`SentenceEmbedder`], a [`MetadataEmbedder`] that joins title,
//! brand and description into one text, encodes it with a MiniLM sentence
//! transformer and returns the 384-dim attention-masked mean of the token
//! states, L2-normalised like the upstream sentence-transformers pipeline.

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use fakeguard_core::{
    FakeguardError, MetadataEmbedder, MetadataModelConfig, MetadataVector, Result,
    METADATA_EMBEDDING_DIM,
};
use tokenizers::{Tokenizer, TruncationParams};

use crate::hub::resolve_model_files;

/// Join the three listing fields into the text the encoder sees.
pub fn compose_text(title: &str, brand: &str, description: &str) -> String {
    format!("{title} {brand} {description}")
}

/// Compute masked average pooling over the sequence dimension.
///
/// `hidden_states` has shape `[batch, seq_len, hidden_size]`.
/// `attention_mask` has shape `[batch, seq_len]` with `1` for real tokens and `0` for padding.
///
/// Returns a tensor of shape `[batch, hidden_size]`.
fn masked_mean_pool(
    hidden_states: &Tensor,
    attention_mask: &Tensor,
) -> candle_core::Result<Tensor> {
    let mask_f32 = attention_mask.to_dtype(DType::F32)?;
    let mask_3d = mask_f32.unsqueeze(2)?.broadcast_as(hidden_states.shape())?;
    let summed = hidden_states.broadcast_mul(&mask_3d)?.sum(1)?;
    let counts = mask_f32
        .sum(1)?
        .unsqueeze(1)?
        .broadcast_as(summed.shape())?;
    // Empty text still yields [CLS] and [SEP], so counts is never zero in practice.
    let counts = (counts + 1e-9)?;
    summed.broadcast_div(&counts)
}

/// Scale `values` to unit Euclidean norm. All-zero input is left unchanged.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

/// [`MetadataEmbedder`] backed by a BERT sentence encoder
/// (default `sentence-transformers/all-MiniLM-L6-v2`).
pub struct SentenceEmbedder {
    tokenizer: Tokenizer,
    model: BertModel,
    device: Device,
    normalize: bool,
}

impl SentenceEmbedder {
    /// Download (or locate) the encoder and its tokenizer.
    ///
    /// # Errors
    ///
    /// Returns an error if any model file is unavailable, the config is not
    /// a BERT config, or the tokenizer cannot be configured.
    pub async fn load(
        config: &MetadataModelConfig,
        cache_dir: Option<&str>,
        device: &Device,
    ) -> Result<Self> {
        let paths = resolve_model_files(
            &config.model_id,
            &["config.json", "tokenizer.json", "model.safetensors"],
            cache_dir,
        )
        .await?;
        let (config_path, tokenizer_path, weights_path) = (&paths[0], &paths[1], &paths[2]);

        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| FakeguardError::Embedding(format!("Failed to read config.json: {e}")))?;
        let bert_config: BertConfig = serde_json::from_str(&config_str)
            .map_err(|e| FakeguardError::Embedding(format!("Failed to parse config.json: {e}")))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| FakeguardError::Embedding(format!("Failed to load tokenizer: {e}")))?;
        tokenizer
            .with_padding(None)
            .with_truncation(Some(TruncationParams {
                max_length: config.max_sequence_length,
                ..Default::default()
            }))
            .map_err(|e| {
                FakeguardError::Embedding(format!("Failed to configure truncation: {e}"))
            })?;

        // SAFETY: memory-mapping safetensors is the standard candle pattern.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device).map_err(
                |e| FakeguardError::Embedding(format!("Failed to load encoder weights: {e}")),
            )?
        };
        let model = BertModel::load(vb, &bert_config)
            .map_err(|e| FakeguardError::Embedding(format!("Failed to build encoder: {e}")))?;

        tracing::info!(
            model_id = %config.model_id,
            max_sequence_length = config.max_sequence_length,
            "Metadata embedding model loaded"
        );

        Ok(Self {
            tokenizer,
            model,
            device: device.clone(),
            normalize: config.normalize,
        })
    }

    /// Encode one text into a pooled sentence embedding.
    pub fn encode(&self, text: &str) -> Result<MetadataVector> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| FakeguardError::Embedding(format!("Tokenization failed: {e}")))?;

        let input_ids = Tensor::new(encoding.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| FakeguardError::Embedding(format!("Tensor creation failed: {e}")))?;
        let token_type_ids = Tensor::new(encoding.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| FakeguardError::Embedding(format!("Tensor creation failed: {e}")))?;
        let attention_mask = Tensor::new(encoding.get_attention_mask(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| FakeguardError::Embedding(format!("Tensor creation failed: {e}")))?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(|e| FakeguardError::Embedding(format!("Encoder forward failed: {e}")))?;

        let mut values: Vec<f32> = masked_mean_pool(&hidden, &attention_mask)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_vec1())
            .map_err(|e| FakeguardError::Embedding(format!("Mean pooling failed: {e}")))?;

        if values.len() != METADATA_EMBEDDING_DIM {
            return Err(FakeguardError::DimensionMismatch {
                expected: METADATA_EMBEDDING_DIM,
                got: values.len(),
            });
        }
        if self.normalize {
            l2_normalize(&mut values);
        }
        MetadataVector::new(values)
    }
}

#[async_trait]
impl MetadataEmbedder for SentenceEmbedder {
    async fn embed(&self, title: &str, brand: &str, description: &str) -> Result<MetadataVector> {
        self.encode(&compose_text(title, brand, description))
    }

    fn name(&self) -> &'static str {
        "SentenceEmbedder"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
