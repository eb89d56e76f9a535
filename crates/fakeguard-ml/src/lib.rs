//! Embedding models, classifier and predictor for fakeguard
//!
//! - [`image_embedder`]: headless ResNet-50 producing 2048-dim image vectors
//! - [`metadata_embedder`]: sentence encoder producing 384-dim text vectors
//! - [`pipeline`]: the one feature extraction path shared by training and
//!   inference
//! - [`forest`]: random forest classifier with JSON persistence
//! - [`predictor`]: single-item inference and the explanation rule

pub mod device;
pub mod forest;
pub mod hub;
pub mod image_embedder;
pub mod metadata_embedder;
pub mod pipeline;
pub mod predictor;

pub use device::select_device;
pub use forest::{DecisionTree, RandomForest};
pub use image_embedder::ResnetImageEmbedder;
pub use metadata_embedder::SentenceEmbedder;
pub use pipeline::FeaturePipeline;
pub use predictor::{explain, PredictRequest, Predictor};
