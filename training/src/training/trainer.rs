//! Random forest training on the stored train partition.

use crate::training::metrics::ClassificationReport;
use crate::training::store::{FeatureStore, Partition};
use fakeguard_core::{Dataset, FakeguardError, ForestConfig, Result};
use fakeguard_ml::RandomForest;
use std::path::PathBuf;

/// Training configuration.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub forest: ForestConfig,
    pub output_path: PathBuf,
    /// Also report on the test partition.
    pub holdout: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            forest: ForestConfig::default(),
            output_path: PathBuf::from("ml/counterfeit_classifier.json"),
            holdout: false,
        }
    }
}

/// Fitted model and its reports.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub forest: RandomForest,
    /// Report over the rows the forest was fitted on.
    pub train_report: ClassificationReport,
    pub holdout_report: Option<ClassificationReport>,
}

/// Fit a forest on `data` and report on the same rows.
pub fn fit_and_report(
    data: &Dataset,
    config: &ForestConfig,
) -> Result<(RandomForest, ClassificationReport)> {
    let forest = RandomForest::fit(data, config)?;
    let report = evaluate(&forest, data)?;
    Ok((forest, report))
}

/// Classification report of `forest` on `data`.
pub fn evaluate(forest: &RandomForest, data: &Dataset) -> Result<ClassificationReport> {
    let predictions = forest.predict_all(data.features())?;
    Ok(ClassificationReport::compute(data.labels(), &predictions))
}

/// Run the full training step: load the train partition, fit, print the
/// report, persist the model.
pub fn train(store: &FeatureStore, config: &TrainConfig) -> Result<TrainOutcome> {
    println!("Loading train partition from {}", store.dir().display());
    let data = store.load_dataset(Partition::Train)?;
    if data.is_empty() {
        return Err(FakeguardError::Validation(
            "train partition is empty".to_string(),
        ));
    }

    let counts = data.class_counts();
    println!(
        "Data: {} samples, {} features, class counts {:?}",
        data.len(),
        data.n_features(),
        counts
    );
    println!(
        "Fitting random forest: {} trees, seed {}",
        config.forest.n_estimators, config.forest.seed
    );

    let (forest, train_report) = fit_and_report(&data, &config.forest)?;

    println!("{:-<60}", "");
    println!("Classification report (training data, in-sample):");
    println!("{train_report}");

    let holdout_report = if config.holdout {
        let test = store.load_dataset(Partition::Test)?;
        let report = evaluate(&forest, &test)?;
        println!("Classification report (held-out test data):");
        println!("{report}");
        Some(report)
    } else {
        None
    };
    println!("{:-<60}", "");

    forest.save(&config.output_path)?;
    tracing::info!(path = %config.output_path.display(), "Model saved");
    println!("Model saved to: {}", config.output_path.display());

    Ok(TrainOutcome {
        forest,
        train_report,
        holdout_report,
    })
}
