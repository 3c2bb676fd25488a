//! Cross-fold aggregation

use super::fold::{FoldOutcome, FoldResult, Prediction};
use super::metrics;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Summary of one metric across succeeded folds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    /// Arithmetic mean
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    /// Smallest fold value
    pub min: f64,
    /// Largest fold value
    pub max: f64,
}

impl MetricStats {
    #[allow(clippy::cast_precision_loss)]
    fn from_values(values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: variance.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// A prediction tagged with the fold that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedPrediction {
    /// Producing fold
    pub fold_id: usize,
    /// The prediction
    #[serde(flatten)]
    pub prediction: Prediction,
}

/// Run-level result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Per-metric statistics over succeeded folds
    pub per_metric_stats: BTreeMap<String, MetricStats>,
    /// Metrics recomputed over every combined prediction
    pub pooled_metrics: BTreeMap<String, f64>,
    /// All predictions, ordered by row index then fold id
    pub combined_predictions: Vec<CombinedPrediction>,
    /// Importances summed across succeeded folds
    pub combined_feature_importance: BTreeMap<String, f64>,
    /// Folds attempted
    pub n_folds: usize,
    /// Folds that completed
    pub n_succeeded_folds: usize,
    /// Folds skipped for lack of data
    pub n_failed_folds: usize,
    /// Ids of the skipped folds
    pub failed_folds: Vec<usize>,
}

impl AggregateResult {
    /// Metric means, as recorded in the registry
    #[must_use]
    pub fn summary_metrics(&self) -> BTreeMap<String, f64> {
        self.per_metric_stats
            .iter()
            .map(|(name, stats)| (name.clone(), stats.mean))
            .collect()
    }

    /// Importances sorted by value, largest first; ties by name
    #[must_use]
    pub fn ranked_feature_importance(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .combined_feature_importance
            .iter()
            .map(|(name, &value)| (name.as_str(), value))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

/// Combines fold outcomes into an [`AggregateResult`]
#[derive(Debug, Clone)]
pub struct Aggregator {
    metric_names: Vec<String>,
}

impl Aggregator {
    /// Aggregator for the given metric names
    #[must_use]
    pub const fn new(metric_names: Vec<String>) -> Self {
        Self { metric_names }
    }

    /// Aggregate fold outcomes (any order).
    ///
    /// # Errors
    /// Returns `Error::Aggregation` if no fold succeeded
    pub fn aggregate(&self, outcomes: &[FoldOutcome]) -> Result<AggregateResult> {
        let mut ordered: Vec<&FoldOutcome> = outcomes.iter().collect();
        ordered.sort_by_key(|o| o.fold_id());

        let succeeded: Vec<&FoldResult> = ordered.iter().filter_map(|o| o.result()).collect();
        let failed_folds: Vec<usize> = ordered
            .iter()
            .filter(|o| o.result().is_none())
            .map(|o| o.fold_id())
            .collect();

        if succeeded.is_empty() {
            return Err(Error::Aggregation(format!(
                "all {} folds failed, nothing to aggregate",
                outcomes.len()
            )));
        }
        if !failed_folds.is_empty() {
            warn!(failed = ?failed_folds, "aggregating without failed folds");
        }

        let mut per_metric_stats = BTreeMap::new();
        for name in &self.metric_names {
            let values: Vec<f64> = succeeded
                .iter()
                .filter_map(|r| r.metrics.get(name).copied())
                .collect();
            if !values.is_empty() {
                per_metric_stats.insert(name.clone(), MetricStats::from_values(&values));
            }
        }

        let mut combined_predictions: Vec<CombinedPrediction> = succeeded
            .iter()
            .flat_map(|r| {
                r.predictions.iter().map(|p| CombinedPrediction {
                    fold_id: r.fold_id,
                    prediction: p.clone(),
                })
            })
            .collect();
        // stable: ties keep fold order
        combined_predictions.sort_by_key(|c| c.prediction.index);

        let mut combined_feature_importance: BTreeMap<String, f64> = BTreeMap::new();
        for result in &succeeded {
            for (name, value) in &result.feature_importances {
                *combined_feature_importance.entry(name.clone()).or_default() += value;
            }
        }

        let actual: Vec<_> = combined_predictions.iter().map(|c| c.prediction.actual).collect();
        let predicted: Vec<_> = combined_predictions
            .iter()
            .map(|c| c.prediction.predicted)
            .collect();
        let pooled_metrics = metrics::compute(&actual, &predicted, &self.metric_names)?;

        info!(
            n_folds = outcomes.len(),
            succeeded = succeeded.len(),
            failed = failed_folds.len(),
            predictions = combined_predictions.len(),
            "folds aggregated"
        );

        Ok(AggregateResult {
            per_metric_stats,
            pooled_metrics,
            combined_predictions,
            combined_feature_importance,
            n_folds: outcomes.len(),
            n_succeeded_folds: succeeded.len(),
            n_failed_folds: failed_folds.len(),
            failed_folds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(fold_id: usize, accuracy: f64, start: usize) -> FoldOutcome {
        FoldOutcome::Completed(FoldResult {
            fold_id,
            train_range: 0..start,
            test_range: start..start + 2,
            train_size: start,
            test_size: 2,
            metrics: [("accuracy".to_string(), accuracy)].into_iter().collect(),
            predictions: (start..start + 2)
                .map(|index| Prediction {
                    index,
                    ts: i64::try_from(index).unwrap(),
                    predicted: 1,
                    actual: 1,
                })
                .collect(),
            feature_importances: [("f".to_string(), 1.5)].into_iter().collect(),
        })
    }

    fn failed(fold_id: usize) -> FoldOutcome {
        FoldOutcome::Failed {
            fold_id,
            reason: "no rows".to_string(),
        }
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(vec!["accuracy".to_string()])
    }

    #[test]
    fn test_stats_use_population_std() {
        let outcomes = vec![completed(0, 0.5, 10), completed(1, 0.7, 12), completed(2, 0.6, 14)];
        let agg = aggregator().aggregate(&outcomes).unwrap();
        let stats = agg.per_metric_stats["accuracy"];
        assert!((stats.mean - 0.6).abs() < 1e-12);
        assert!((stats.std - (0.02_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((stats.min - 0.5).abs() < 1e-12);
        assert!((stats.max - 0.7).abs() < 1e-12);
        assert_eq!(agg.summary_metrics()["accuracy"], stats.mean);
    }

    #[test]
    fn test_failed_folds_excluded_and_counted() {
        let outcomes = vec![completed(0, 0.5, 10), failed(1), completed(2, 0.7, 14)];
        let agg = aggregator().aggregate(&outcomes).unwrap();
        assert_eq!(agg.n_folds, 3);
        assert_eq!(agg.n_succeeded_folds, 2);
        assert_eq!(agg.n_failed_folds, 1);
        assert_eq!(agg.failed_folds, vec![1]);
        assert!((agg.per_metric_stats["accuracy"].mean - 0.6).abs() < 1e-12);
        assert!((agg.combined_feature_importance["f"] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_all_failed_is_error() {
        let err = aggregator().aggregate(&[failed(0), failed(1)]).unwrap_err();
        assert!(matches!(err, Error::Aggregation(_)));
        assert!(aggregator().aggregate(&[]).is_err());
    }

    #[test]
    fn test_predictions_time_ordered_and_tagged() {
        // out of order input, overlapping index 11
        let outcomes = vec![completed(1, 0.5, 11), completed(0, 0.5, 10)];
        let agg = aggregator().aggregate(&outcomes).unwrap();
        let keys: Vec<(usize, usize)> = agg
            .combined_predictions
            .iter()
            .map(|c| (c.prediction.index, c.fold_id))
            .collect();
        assert_eq!(keys, vec![(10, 0), (11, 0), (11, 1), (12, 1)]);
        assert!((agg.pooled_metrics["accuracy"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ranked_importance() {
        let mut agg = aggregator().aggregate(&[completed(0, 0.5, 10)]).unwrap();
        agg.combined_feature_importance.insert("a".to_string(), 0.1);
        agg.combined_feature_importance.insert("z".to_string(), 9.0);
        let names: Vec<&str> = agg.ranked_feature_importance().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["z", "f", "a"]);
    }
}
