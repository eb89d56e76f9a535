//! Reproducible train/test splitting.

use crate::training::store::{FeatureStore, Partition};
use fakeguard_core::{Dataset, FakeguardError, Result, SplitConfig};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// Row indices of each side of a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

fn check_fraction(test_fraction: f64) -> Result<()> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(FakeguardError::Config(format!(
            "test_fraction must be in (0, 1), got {test_fraction}"
        )));
    }
    Ok(())
}

/// Number of test rows for `n` rows: `ceil(test_fraction * n)`.
pub fn test_count(n: usize, test_fraction: f64) -> usize {
    (test_fraction * n as f64).ceil() as usize
}

/// Shuffle `0..n` with a seeded ChaCha8 RNG; the first
/// [`test_count`] indices form the test side.
pub fn shuffled_split(n: usize, test_fraction: f64, seed: u64) -> Result<SplitIndices> {
    check_fraction(test_fraction)?;
    let n_test = test_count(n, test_fraction);
    if n_test >= n {
        return Err(FakeguardError::Validation(format!(
            "{n} samples with test_fraction {test_fraction} leave an empty train set"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train = indices.split_off(n_test);
    Ok(SplitIndices {
        train,
        test: indices,
    })
}

/// Split each class separately so both sides keep the class ratios.
pub fn stratified_split(labels: &[i64], test_fraction: f64, seed: u64) -> Result<SplitIndices> {
    check_fraction(test_fraction)?;

    let mut by_class: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for indices in by_class.values_mut() {
        indices.shuffle(&mut rng);
        let n_test = ((indices.len() as f64 * test_fraction).round() as usize).min(indices.len());
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }

    if train.is_empty() || test.is_empty() {
        return Err(FakeguardError::Validation(format!(
            "stratified split of {} samples left an empty side (train={}, test={})",
            labels.len(),
            train.len(),
            test.len()
        )));
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    Ok(SplitIndices { train, test })
}

/// Partition `data` into (train, test) according to `config`.
pub fn train_test_split(data: &Dataset, config: &SplitConfig) -> Result<(Dataset, Dataset)> {
    let indices = if config.stratify {
        stratified_split(data.labels(), config.test_fraction, config.seed)?
    } else {
        shuffled_split(data.len(), config.test_fraction, config.seed)?
    };
    Ok((data.select(&indices.train)?, data.select(&indices.test)?))
}

/// Read `X`/`y` from the store, split, and write the four partition files.
pub fn run_split(store: &FeatureStore, config: &SplitConfig) -> Result<(Dataset, Dataset)> {
    let data = store.load_dataset(Partition::All)?;
    let (train, test) = train_test_split(&data, config)?;

    store.save_dataset(&train, Partition::Train)?;
    store.save_dataset(&test, Partition::Test)?;

    tracing::info!(
        seed = config.seed,
        test_fraction = config.test_fraction,
        stratify = config.stratify,
        "Split written"
    );
    println!(
        "Split: train={} test={} (seed {})",
        train.len(),
        test.len(),
        config.seed
    );
    Ok((train, test))
}
