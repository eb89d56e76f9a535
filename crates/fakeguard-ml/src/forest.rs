//! Random forest classifier over combined feature vectors.
//!
//! Bagged CART trees with Gini impurity:
//!
//! - each tree is grown on a bootstrap resample drawn from
//!   `ChaCha8Rng::seed_from_u64(seed + tree_index)`, so a fixed seed gives a
//!   bit-identical forest;
//! - each split examines a random subset of `max_features` candidate
//!   features (continuing past the subset when none of them separates the
//!   node), thresholding at the midpoint between adjacent distinct values;
//! - leaves store class probability distributions, and the forest averages
//!   them.
//!
//! The fitted forest is persisted as JSON together with its class list and
//! feature count; [`RandomForest::load`] validates the tree structure before
//! the model is used.

use std::path::Path;

use fakeguard_core::{Classifier, Dataset, FakeguardError, FeatureMatrix, ForestConfig, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Version tag written into persisted models.
const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Trees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
    Leaf {
        distribution: Vec<f64>,
    },
}

/// A single fitted decision tree. Node 0 is the root; children always have
/// larger indices than their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn leaf_distribution(&self, row: &[f32]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Check that traversal terminates and stays in bounds.
    fn validate(&self, n_features: usize, n_classes: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(FakeguardError::Model("tree has no nodes".to_string()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(FakeguardError::Model(format!(
                            "node {i} splits on feature {feature}, model has {n_features}"
                        )));
                    }
                    for child in [*left, *right] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(FakeguardError::Model(format!(
                                "node {i} has invalid child index {child}"
                            )));
                        }
                    }
                }
                Node::Leaf { distribution } => {
                    if distribution.len() != n_classes {
                        return Err(FakeguardError::Model(format!(
                            "leaf {i} has {} class probabilities, model has {n_classes} classes",
                            distribution.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

fn distribution(counts: &[usize]) -> Vec<f64> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0.0; counts.len()];
    }
    counts.iter().map(|&c| c as f64 / total as f64).collect()
}

struct SplitCandidate {
    feature: usize,
    threshold: f32,
    impurity: f64,
}

/// Grows one tree from a set of (possibly repeated) row indices.
struct TreeBuilder<'a> {
    x: &'a FeatureMatrix,
    y: &'a [usize],
    n_classes: usize,
    config: &'a ForestConfig,
    max_features: usize,
    rng: ChaCha8Rng,
    feature_order: Vec<usize>,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn grow(mut self, samples: Vec<usize>) -> DecisionTree {
        self.build(samples, 0);
        DecisionTree { nodes: self.nodes }
    }

    fn class_counts(&self, samples: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for &i in samples {
            counts[self.y[i]] += 1;
        }
        counts
    }

    fn build(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_counts(&samples);
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf {
            distribution: distribution(&counts),
        });

        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_reached = self.config.max_depth.is_some_and(|d| depth >= d);
        if pure || depth_reached || samples.len() < self.config.min_samples_split {
            return index;
        }

        let Some(split) = self.best_split(&samples, &counts) else {
            return index;
        };

        let x = self.x;
        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| x.row(i)[split.feature] <= split.threshold);

        let left = self.build(left, depth + 1);
        let right = self.build(right, depth + 1);
        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        index
    }

    fn best_split(&mut self, samples: &[usize], parent_counts: &[usize]) -> Option<SplitCandidate> {
        let n = samples.len();
        let min_leaf = self.config.min_samples_leaf;
        self.feature_order.shuffle(&mut self.rng);

        let mut best: Option<SplitCandidate> = None;
        let mut pairs: Vec<(f32, usize)> = Vec::with_capacity(n);

        for (visited, &feature) in self.feature_order.iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }

            pairs.clear();
            pairs.extend(samples.iter().map(|&i| (self.x.row(i)[feature], self.y[i])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left = vec![0usize; self.n_classes];
            let mut right = parent_counts.to_vec();

            for pos in 1..n {
                let (value, class) = pairs[pos - 1];
                left[class] += 1;
                right[class] -= 1;

                let next = pairs[pos].0;
                if value == next || value.is_nan() || next.is_nan() {
                    continue;
                }
                if pos < min_leaf || n - pos < min_leaf {
                    continue;
                }

                let impurity = (pos as f64 * gini(&left, pos)
                    + (n - pos) as f64 * gini(&right, n - pos))
                    / n as f64;
                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    let mid = value / 2.0 + next / 2.0;
                    let threshold = if mid < next && mid.is_finite() {
                        mid
                    } else {
                        value
                    };
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        impurity,
                    });
                }
            }
        }

        best
    }
}

// ---------------------------------------------------------------------------
// RandomForest
// ---------------------------------------------------------------------------

/// Fitted random forest classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    format_version: u32,
    classes: Vec<i64>,
    n_features: usize,
    config: ForestConfig,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit a forest on `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is empty or `config.n_estimators` is zero.
    pub fn fit(data: &Dataset, config: &ForestConfig) -> Result<Self> {
        if data.is_empty() {
            return Err(FakeguardError::Model(
                "cannot fit a forest on an empty dataset".to_string(),
            ));
        }
        if config.n_estimators == 0 {
            return Err(FakeguardError::Model(
                "forest needs at least one estimator".to_string(),
            ));
        }

        let classes: Vec<i64> = data.class_counts().into_keys().collect();
        let y: Vec<usize> = data
            .labels()
            .iter()
            .map(|label| classes.partition_point(|c| c < label))
            .collect();

        let n = data.len();
        let n_features = data.n_features();
        let max_features = config.max_features.resolve(n_features);

        let trees: Vec<DecisionTree> = (0..config.n_estimators)
            .map(|t| {
                let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(t as u64));
                let samples: Vec<usize> = if config.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                TreeBuilder {
                    x: data.features(),
                    y: &y,
                    n_classes: classes.len(),
                    config,
                    max_features,
                    rng,
                    feature_order: (0..n_features).collect(),
                    nodes: Vec::new(),
                }
                .grow(samples)
            })
            .collect();

        tracing::debug!(
            trees = trees.len(),
            samples = n,
            features = n_features,
            classes = classes.len(),
            "Random forest fitted"
        );

        Ok(Self {
            format_version: FORMAT_VERSION,
            classes,
            n_features,
            config: config.clone(),
            trees,
        })
    }

    /// Hyperparameters the forest was fitted with.
    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Predict the class of every row in `x`.
    pub fn predict_all(&self, x: &FeatureMatrix) -> Result<Vec<i64>> {
        x.rows().map(|row| self.predict(row)).collect()
    }

    /// Write the forest to `path` as JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(self)?;
        std::fs::write(path, bytes).map_err(|e| {
            FakeguardError::Model(format!("Failed to write model {}: {e}", path.display()))
        })
    }

    /// Read and validate a forest written by [`RandomForest::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            FakeguardError::Model(format!("Failed to read model {}: {e}", path.display()))
        })?;
        let forest: Self = serde_json::from_slice(&bytes)?;
        forest.validate()?;
        Ok(forest)
    }

    fn validate(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(FakeguardError::Model(format!(
                "unsupported model format version {}",
                self.format_version
            )));
        }
        if self.classes.is_empty() || self.trees.is_empty() {
            return Err(FakeguardError::Model(
                "model has no classes or no trees".to_string(),
            ));
        }
        for tree in &self.trees {
            tree.validate(self.n_features, self.classes.len())?;
        }
        Ok(())
    }
}

impl Classifier for RandomForest {
    fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, row: &[f32]) -> Result<Vec<f64>> {
        if row.len() != self.n_features {
            return Err(FakeguardError::DimensionMismatch {
                expected: self.n_features,
                got: row.len(),
            });
        }
        let mut proba = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (p, leaf) in proba.iter_mut().zip(tree.leaf_distribution(row)) {
                *p += leaf;
            }
        }
        let n_trees = self.trees.len() as f64;
        for p in &mut proba {
            *p /= n_trees;
        }
        Ok(proba)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use fakeguard_core::MaxFeatures;

    /// Two well-separated clusters on feature 1; features 0 and 2 are noise.
    fn separable() -> Dataset {
        let mut ds = Dataset::new(3);
        for i in 0..20 {
            let noise = (i % 7) as f32;
            let label = i64::from(i >= 10);
            let signal = if label == 1 { 10.0 + i as f32 } else { i as f32 * 0.1 };
            ds.push(&[noise, signal, -noise], label).unwrap();
        }
        ds
    }

    fn config(n_estimators: usize) -> ForestConfig {
        ForestConfig {
            n_estimators,
            ..ForestConfig::default()
        }
    }

    #[test]
    fn test_fit_separable_predicts_training_labels() {
        let ds = separable();
        let cfg = ForestConfig {
            max_features: MaxFeatures::All,
            ..config(25)
        };
        let forest = RandomForest::fit(&ds, &cfg).unwrap();
        assert_eq!(forest.classes(), &[0, 1]);
        assert_eq!(forest.trees().len(), 25);

        let preds = forest.predict_all(ds.features()).unwrap();
        assert_eq!(preds, ds.labels());
        assert_eq!(forest.predict(&[3.0, 20.0, -3.0]).unwrap(), 1);
        assert_eq!(forest.predict(&[3.0, 0.2, -3.0]).unwrap(), 0);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let forest = RandomForest::fit(&separable(), &config(10)).unwrap();
        let proba = forest.predict_proba(&[1.0, 5.0, 2.0]).unwrap();
        assert_eq!(proba.len(), 2);
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_same_seed_same_forest() {
        let ds = separable();
        let a = RandomForest::fit(&ds, &config(8)).unwrap();
        let b = RandomForest::fit(&ds, &config(8)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_class_dataset() {
        let mut ds = Dataset::new(2);
        ds.push(&[0.0, 1.0], 1).unwrap();
        ds.push(&[2.0, 3.0], 1).unwrap();
        let forest = RandomForest::fit(&ds, &config(3)).unwrap();
        assert_eq!(forest.classes(), &[1]);
        assert_eq!(forest.predict_proba(&[9.0, 9.0]).unwrap(), vec![1.0]);
        assert_eq!(forest.predict(&[9.0, 9.0]).unwrap(), 1);
    }

    #[test]
    fn test_max_depth_limits_trees() {
        let cfg = ForestConfig {
            n_estimators: 5,
            max_depth: Some(1),
            max_features: MaxFeatures::All,
            ..ForestConfig::default()
        };
        let forest = RandomForest::fit(&separable(), &cfg).unwrap();
        assert!(forest.trees().iter().all(|t| t.depth() <= 1));
        assert!(forest.trees().iter().all(|t| t.node_count() <= 3));
    }

    #[test]
    fn test_rejects_wrong_row_length() {
        let forest = RandomForest::fit(&separable(), &config(2)).unwrap();
        let err = forest.predict_proba(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            FakeguardError::DimensionMismatch {
                expected: 3,
                got: 2
            }
        ));
    }

    #[test]
    fn test_fit_rejects_empty() {
        assert!(RandomForest::fit(&Dataset::new(3), &config(2)).is_err());
        assert!(RandomForest::fit(&separable(), &config(0)).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("forest.json");
        let forest = RandomForest::fit(&separable(), &config(4)).unwrap();

        forest.save(&path).unwrap();
        let loaded = RandomForest::load(&path).unwrap();
        assert_eq!(loaded, forest);
        assert_eq!(
            loaded.predict_proba(&[0.0, 15.0, 0.0]).unwrap(),
            forest.predict_proba(&[0.0, 15.0, 0.0]).unwrap()
        );
    }

    #[test]
    fn test_load_rejects_cyclic_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.json");
        let forest = RandomForest::fit(&separable(), &config(1)).unwrap();

        let mut json: serde_json::Value = serde_json::to_value(&forest).unwrap();
        json["trees"][0]["nodes"][0] = serde_json::json!({
            "kind": "split", "feature": 0, "threshold": 0.5, "left": 0, "right": 0
        });
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        assert!(RandomForest::load(&path).is_err());
    }

    #[test]
    fn test_load_nonexistent_path_fails() {
        assert!(RandomForest::load(Path::new("/nonexistent/forest.json")).is_err());
    }
}
