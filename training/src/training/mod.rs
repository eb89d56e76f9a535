//! Dataset building, splitting and random forest training.

pub mod dataset;
pub mod metrics;
pub mod split;
pub mod store;
pub mod trainer;
