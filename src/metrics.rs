use std::fmt::{self, Write as _};

use ndarray::Array2;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub class: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Rows are true classes, columns predicted classes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: Array2<usize>,
}

impl ConfusionMatrix {
    pub fn new(truth: &[usize], predicted: &[usize], classes: usize) -> Self {
        let mut counts = Array2::zeros((classes, classes));
        for (&t, &p) in truth.iter().zip(predicted) {
            counts[[t, p]] += 1;
        }
        ConfusionMatrix { counts }
    }

    pub fn classes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn count(&self, truth: usize, predicted: usize) -> usize {
        self.counts[[truth, predicted]]
    }

    pub fn true_positives(&self, class: usize) -> usize {
        self.counts[[class, class]]
    }

    /// Samples predicted as `class`
    pub fn predicted(&self, class: usize) -> usize {
        self.counts.column(class).sum()
    }

    /// Samples whose true class is `class`
    pub fn support(&self, class: usize) -> usize {
        self.counts.row(class).sum()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.counts.rows() {
            let cells: Vec<String> = row.iter().map(|c| format!("{c:>5}")).collect();
            writeln!(f, "[{} ]", cells.join(""))?;
        }
        Ok(())
    }
}

/// Classification quality of a set of predictions.
///
/// Per-class scores follow the usual conventions: a class that was never
/// predicted has precision 0, a class that never occurs has recall 0, and
/// F1 is 0 whenever precision and recall are both 0. The headline scores
/// average the per-class ones weighted by each class's support.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub per_class: Vec<ClassMetrics>,
    pub confusion: ConfusionMatrix,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Metrics {
    /// `classes` is a lower bound; labels beyond it widen the matrix
    pub fn from_predictions(truth: &[usize], predicted: &[usize], classes: usize) -> Self {
        assert_eq!(truth.len(), predicted.len(), "Truth and prediction counts differ");

        let classes = truth.iter().chain(predicted).map(|&c| c + 1).fold(classes, usize::max);
        let confusion = ConfusionMatrix::new(truth, predicted, classes);

        let per_class: Vec<ClassMetrics> = (0..classes)
            .map(|class| {
                let tp = confusion.true_positives(class) as f64;
                let support = confusion.support(class);
                let precision = ratio(tp, confusion.predicted(class));
                let recall = ratio(tp, support);
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                ClassMetrics {
                    class,
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let total = truth.len();
        let weighted = |score: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                return 0.0;
            }
            per_class.iter().map(|m| score(m) * m.support as f64).sum::<f64>() / total as f64
        };
        let precision = weighted(|m: &ClassMetrics| m.precision);
        let recall = weighted(|m: &ClassMetrics| m.recall);
        let f1 = weighted(|m: &ClassMetrics| m.f1);

        let correct: usize = (0..classes).map(|c| confusion.true_positives(c)).sum();
        let accuracy = ratio(correct as f64, total);

        Metrics {
            per_class,
            confusion,
            accuracy,
            precision,
            recall,
            f1,
        }
    }

    /// A per-class table, naming classes by `names` where one is given
    pub fn report(&self, names: &[String]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:>20}{:>11}{:>10}{:>10}{:>10}", "", "precision", "recall", "f1-score", "support");
        for m in &self.per_class {
            let name = names.get(m.class).cloned().unwrap_or_else(|| m.class.to_string());
            let _ = writeln!(
                out,
                "{:>20}{:>11.2}{:>10.2}{:>10.2}{:>10}",
                name, m.precision, m.recall, m.f1, m.support
            );
        }
        let total: usize = self.per_class.iter().map(|m| m.support).sum();
        let _ = writeln!(out);
        let _ = writeln!(out, "{:>20}{:>11}{:>10}{:>10.2}{:>10}", "accuracy", "", "", self.accuracy, total);
        let _ = write!(
            out,
            "{:>20}{:>11.2}{:>10.2}{:>10.2}{:>10}",
            "weighted avg", self.precision, self.recall, self.f1, total
        );
        out
    }
}

fn ratio(numerator: f64, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator / denominator as f64
    }
}
