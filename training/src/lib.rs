//! fakeguard offline training pipeline
//!
//! Turns a JSON dataset of labelled product listings into a fitted random
//! forest:
//!
//! - [`training::dataset`]: run every sample through the shared feature
//!   pipeline and persist the feature vectors
//! - [`training::split`]: reproducible train/test partition
//! - [`training::trainer`]: fit, report and persist the classifier
//! - [`training::store`]: safetensors feature store and manifest
//! - [`training::metrics`]: per-class classification report

pub mod training;
