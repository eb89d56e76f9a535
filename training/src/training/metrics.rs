//! Classification report for the random forest.
//!
//! Per-class precision, recall, F1 and support, plus accuracy and the macro
//! and support-weighted averages. Undefined ratios (no predictions or no
//! support for a class) count as 0.

use std::collections::BTreeSet;

/// Metrics for one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub label: i64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Averaged precision / recall / F1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AveragedMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AveragedMetrics,
    pub weighted_avg: AveragedMetrics,
    pub total: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl ClassificationReport {
    /// Build the report over every label seen in either slice.
    pub fn compute(y_true: &[i64], y_pred: &[i64]) -> Self {
        assert_eq!(
            y_true.len(),
            y_pred.len(),
            "predictions and labels must have same length"
        );

        let labels: BTreeSet<i64> = y_true.iter().chain(y_pred).copied().collect();
        let total = y_true.len();

        let classes: Vec<ClassMetrics> = labels
            .into_iter()
            .map(|label| {
                let mut tp = 0usize;
                let mut predicted = 0usize;
                let mut support = 0usize;
                for (&t, &p) in y_true.iter().zip(y_pred) {
                    if p == label {
                        predicted += 1;
                        if t == label {
                            tp += 1;
                        }
                    }
                    if t == label {
                        support += 1;
                    }
                }
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label,
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();

        let n_classes = classes.len().max(1) as f64;
        let macro_avg = AveragedMetrics {
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n_classes,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n_classes,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n_classes,
        };

        let weight = |f: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / total as f64
            }
        };
        let weighted_avg = AveragedMetrics {
            precision: weight(|c| c.precision),
            recall: weight(|c| c.recall),
            f1: weight(|c| c.f1),
        };

        Self {
            accuracy: ratio(correct, total),
            classes,
            macro_avg,
            weighted_avg,
            total,
        }
    }
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.label, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.total
        )?;
        for (name, avg) in [("macro avg", self.macro_avg), ("weighted avg", self.weighted_avg)] {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, avg.precision, avg.recall, avg.f1, self.total
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let r = ClassificationReport::compute(&[0, 0, 1, 1], &[0, 0, 1, 1]);
        assert!((r.accuracy - 1.0).abs() < 1e-9);
        assert_eq!(r.classes.len(), 2);
        assert!(r.classes.iter().all(|c| (c.f1 - 1.0).abs() < 1e-9));
        assert_eq!(r.classes[1].support, 2);
    }

    #[test]
    fn test_mixed() {
        // class 1: 3 TP, 1 FP, 1 FN; class 0: 2 TP, 1 FP, 1 FN
        let y_true = [1, 1, 1, 0, 0, 0, 1];
        let y_pred = [1, 1, 1, 1, 0, 0, 0];
        let r = ClassificationReport::compute(&y_true, &y_pred);

        let c1 = &r.classes[1];
        assert!((c1.precision - 0.75).abs() < 1e-9);
        assert!((c1.recall - 0.75).abs() < 1e-9);
        assert_eq!(c1.support, 4);

        let c0 = &r.classes[0];
        assert!((c0.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((c0.recall - 2.0 / 3.0).abs() < 1e-9);

        assert!((r.accuracy - 5.0 / 7.0).abs() < 1e-9);
        assert!((r.macro_avg.recall - (0.75 + 2.0 / 3.0) / 2.0).abs() < 1e-9);
        assert!((r.weighted_avg.recall - r.accuracy).abs() < 1e-9);
    }

    #[test]
    fn test_unpredicted_class_scores_zero() {
        let r = ClassificationReport::compute(&[0, 1], &[0, 0]);
        assert_eq!(r.classes[1].precision, 0.0);
        assert_eq!(r.classes[1].f1, 0.0);
    }

    #[test]
    fn test_empty() {
        let r = ClassificationReport::compute(&[], &[]);
        assert_eq!(r.total, 0);
        assert_eq!(r.accuracy, 0.0);
        assert!(r.classes.is_empty());
    }

    #[test]
    fn test_display_layout() {
        let text = ClassificationReport::compute(&[0, 1], &[0, 1]).to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0].trim(), "precision    recall  f1-score   support");
        assert_eq!(lines[2].trim(), "0      1.00      1.00      1.00         1");
        assert!(lines.iter().any(|l| l.trim_start().starts_with("accuracy")));
        assert!(lines.last().unwrap().trim_start().starts_with("weighted avg"));
    }
}
