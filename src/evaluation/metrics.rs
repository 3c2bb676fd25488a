//! Classification metrics
//!
//! Multi-class metrics follow the usual conventions: the class set is the
//! union of true and predicted labels, a zero denominator yields 0.0.

use crate::strategy::Label;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Every metric name accepted in `evaluation.metrics`
pub const KNOWN_METRICS: [&str; 6] = [
    "accuracy",
    "precision_macro",
    "recall_macro",
    "f1_macro",
    "f1_weighted",
    "cohen_kappa",
];

/// Whether `name` is a supported metric
#[must_use]
pub fn is_known(name: &str) -> bool {
    KNOWN_METRICS.contains(&name)
}

/// Compute the named metrics.
///
/// # Errors
/// Returns error if the inputs differ in length or a name is unknown
pub fn compute(actual: &[Label], predicted: &[Label], names: &[String]) -> Result<BTreeMap<String, f64>> {
    if actual.len() != predicted.len() {
        return Err(Error::Strategy(format!(
            "{} predictions for {} labels",
            predicted.len(),
            actual.len()
        )));
    }
    let confusion = Confusion::new(actual, predicted);
    names
        .iter()
        .map(|name| {
            let value = match name.as_str() {
                "accuracy" => confusion.accuracy(),
                "precision_macro" => confusion.macro_average(Confusion::precision),
                "recall_macro" => confusion.macro_average(Confusion::recall),
                "f1_macro" => confusion.macro_average(Confusion::f1),
                "f1_weighted" => confusion.weighted_f1(),
                "cohen_kappa" => confusion.cohen_kappa(),
                other => return Err(Error::Config(format!("unknown metric '{other}'"))),
            };
            Ok((name.clone(), value))
        })
        .collect()
}

struct Confusion {
    total: usize,
    classes: Vec<Label>,
    // (true positives, predicted count, actual count) per class
    counts: BTreeMap<Label, (usize, usize, usize)>,
    correct: usize,
}

#[allow(clippy::cast_precision_loss)]
impl Confusion {
    fn new(actual: &[Label], predicted: &[Label]) -> Self {
        let classes: BTreeSet<Label> = actual.iter().chain(predicted).copied().collect();
        let mut counts: BTreeMap<Label, (usize, usize, usize)> =
            classes.iter().map(|&c| (c, (0, 0, 0))).collect();
        let mut correct = 0;
        for (&a, &p) in actual.iter().zip(predicted) {
            if a == p {
                correct += 1;
                if let Some(entry) = counts.get_mut(&a) {
                    entry.0 += 1;
                }
            }
            if let Some(entry) = counts.get_mut(&p) {
                entry.1 += 1;
            }
            if let Some(entry) = counts.get_mut(&a) {
                entry.2 += 1;
            }
        }
        Self {
            total: actual.len(),
            classes: classes.into_iter().collect(),
            counts,
            correct,
        }
    }

    fn accuracy(&self) -> f64 {
        ratio(self.correct, self.total)
    }

    fn precision(&self, class: Label) -> f64 {
        let (tp, predicted, _) = self.counts[&class];
        ratio(tp, predicted)
    }

    fn recall(&self, class: Label) -> f64 {
        let (tp, _, actual) = self.counts[&class];
        ratio(tp, actual)
    }

    fn f1(&self, class: Label) -> f64 {
        let (tp, predicted, actual) = self.counts[&class];
        ratio(2 * tp, predicted + actual)
    }

    fn macro_average(&self, per_class: fn(&Self, Label) -> f64) -> f64 {
        if self.classes.is_empty() {
            return 0.0;
        }
        self.classes.iter().map(|&c| per_class(self, c)).sum::<f64>() / self.classes.len() as f64
    }

    fn weighted_f1(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.classes
            .iter()
            .map(|&c| self.f1(c) * self.counts[&c].2 as f64)
            .sum::<f64>()
            / self.total as f64
    }

    fn cohen_kappa(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let n = self.total as f64;
        let observed = self.correct as f64 / n;
        let expected: f64 = self
            .counts
            .values()
            .map(|&(_, predicted, actual)| (predicted as f64 / n) * (actual as f64 / n))
            .sum();
        if (1.0 - expected).abs() < f64::EPSILON {
            0.0
        } else {
            (observed - expected) / (1.0 - expected)
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
