//! Train, predict and score one fold

use super::metrics;
use super::splitter::Fold;
use crate::config::{MissingPolicy, RunConfig};
use crate::storage::MarketData;
use crate::strategy::{FeatureProvider, Label, LabelProvider, ModelFactory, StrategyCatalog};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{info, warn};

/// One out-of-sample prediction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    /// Absolute row index in the dataset
    pub index: usize,
    /// Bar timestamp (seconds since epoch)
    pub ts: i64,
    /// Model output
    pub predicted: Label,
    /// Ground-truth label
    pub actual: Label,
}

/// Result of a successful fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    /// Fold id
    pub fold_id: usize,
    /// Train rows of the split
    pub train_range: Range<usize>,
    /// Test rows of the split
    pub test_range: Range<usize>,
    /// Train rows left after purging and missing-value handling
    pub train_size: usize,
    /// Test rows left after missing-value handling
    pub test_size: usize,
    /// Requested metrics on the test rows
    pub metrics: BTreeMap<String, f64>,
    /// Test predictions in row order
    pub predictions: Vec<Prediction>,
    /// Importance per feature column; empty if the model exposes none
    pub feature_importances: BTreeMap<String, f64>,
}

/// What happened to one fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FoldOutcome {
    /// Fold trained and scored
    Completed(FoldResult),
    /// Fold skipped for lack of usable data
    Failed {
        /// Fold id
        fold_id: usize,
        /// Why it was skipped
        reason: String,
    },
}

impl FoldOutcome {
    /// Fold id
    #[must_use]
    pub const fn fold_id(&self) -> usize {
        match self {
            Self::Completed(result) => result.fold_id,
            Self::Failed { fold_id, .. } => *fold_id,
        }
    }

    /// The result, if the fold completed
    #[must_use]
    pub const fn result(&self) -> Option<&FoldResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Failed { .. } => None,
        }
    }
}

/// A completed fold plus the fitted model's serialized state
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedFold {
    /// Fold result
    pub result: FoldResult,
    /// Model snapshot, if the model supports it
    pub model_state: Option<serde_json::Value>,
}

/// Runs folds against a resolved config and the strategy collaborators.
///
/// Holds no mutable state, so folds can run concurrently.
#[derive(Clone, Copy)]
pub struct FoldExecutor<'a> {
    config: &'a RunConfig,
    features: &'a dyn FeatureProvider,
    labels: &'a dyn LabelProvider,
    models: &'a dyn ModelFactory,
}

impl<'a> FoldExecutor<'a> {
    /// Executor over explicit collaborators
    #[must_use]
    pub const fn new(
        config: &'a RunConfig,
        features: &'a dyn FeatureProvider,
        labels: &'a dyn LabelProvider,
        models: &'a dyn ModelFactory,
    ) -> Self {
        Self {
            config,
            features,
            labels,
            models,
        }
    }

    /// Executor using one catalog for every collaborator
    #[must_use]
    pub const fn from_catalog(config: &'a RunConfig, catalog: &'a StrategyCatalog) -> Self {
        Self::new(config, catalog, catalog, catalog)
    }

    /// Run a fold, turning insufficient data into a failed outcome.
    ///
    /// # Errors
    /// Returns every error other than `Error::InsufficientData`
    pub fn run(&self, fold: &Fold, data: &MarketData) -> Result<(FoldOutcome, Option<serde_json::Value>)> {
        match self.execute(fold, data) {
            Ok(executed) => Ok((FoldOutcome::Completed(executed.result), executed.model_state)),
            Err(e) if e.is_fold_local() => {
                warn!(fold_id = fold.fold_id, error = %e, "fold skipped");
                Ok((
                    FoldOutcome::Failed {
                        fold_id: fold.fold_id,
                        reason: e.to_string(),
                    },
                    None,
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Run a fold.
    ///
    /// Train labels are computed on the train rows alone, so no train label
    /// can look into the test range; the last `horizon` train rows end up
    /// unlabelled and are dropped.
    ///
    /// # Errors
    /// Returns `Error::InsufficientData` if no usable train or test rows
    /// remain, `Error::Strategy` if a collaborator returns misaligned output
    pub fn execute(&self, fold: &Fold, data: &MarketData) -> Result<ExecutedFold> {
        let fold_id = fold.fold_id;
        if fold.train.end != fold.test.start || fold.test.end > data.len() || fold.train.is_empty() {
            return Err(Error::Config(format!(
                "fold {fold_id} ({:?} / {:?}) does not fit {} rows",
                fold.train,
                fold.test,
                data.len()
            )));
        }
        let window = data.slice(fold.window());
        let train_len = fold.train_size();
        let insufficient = |reason: String| Error::InsufficientData { fold_id, reason };

        let mut table = self.features.compute(window, &self.config.features().sets)?;
        if table.n_rows() != window.len() {
            return Err(Error::Strategy(format!(
                "feature table has {} rows for a {}-row slice",
                table.n_rows(),
                window.len()
            )));
        }

        let label = self.config.label();
        let horizon = self.labels.horizon(&label.strategy, &label.params)?;
        if horizon >= train_len {
            return Err(insufficient(format!(
                "label horizon {horizon} leaves no labelled rows in {train_len} train rows"
            )));
        }
        let train_labels = self
            .labels
            .compute(&window[..train_len], &label.strategy, &label.params)?;
        let full_labels = self.labels.compute(window, &label.strategy, &label.params)?;
        if train_labels.len() != train_len || full_labels.len() != window.len() {
            return Err(Error::Strategy(format!(
                "label strategy '{}' returned misaligned labels",
                label.strategy
            )));
        }

        if self.config.features().missing == MissingPolicy::FfillThenDrop {
            table.forward_fill();
        }
        let usable = |rows: Range<usize>, labels: &[Option<Label>]| -> Vec<(usize, Label)> {
            rows.filter(|&r| table.row_is_complete(r))
                .filter_map(|r| labels[r].map(|l| (r, l)))
                .collect()
        };
        let train_rows = usable(0..train_len, &train_labels);
        let test_rows = usable(train_len..window.len(), &full_labels);
        if train_rows.is_empty() {
            return Err(insufficient("no usable train rows after dropping".to_string()));
        }
        if test_rows.is_empty() {
            return Err(insufficient("no usable test rows after dropping".to_string()));
        }

        let (train_idx, y_train): (Vec<usize>, Vec<Label>) = train_rows.into_iter().unzip();
        let (test_idx, y_test): (Vec<usize>, Vec<Label>) = test_rows.into_iter().unzip();
        let x_train = table.rows(&train_idx);
        let x_test = table.rows(&test_idx);

        let seed = self.config.seed() ^ fold_id as u64;
        let model_cfg = self.config.model();
        let mut model = self.models.create(&model_cfg.kind, &model_cfg.params, seed)?;
        model.fit(&x_train, &y_train)?;
        let predicted = model.predict(&x_test)?;
        if predicted.len() != y_test.len() {
            return Err(Error::Strategy(format!(
                "model '{}' returned {} predictions for {} rows",
                model_cfg.kind,
                predicted.len(),
                y_test.len()
            )));
        }

        let metrics = metrics::compute(&y_test, &predicted, &self.config.evaluation().metrics)?;

        let feature_importances = match model.feature_importances() {
            Some(values) if values.len() == table.n_features() => {
                table.names().iter().cloned().zip(values).collect()
            }
            Some(values) => {
                return Err(Error::Strategy(format!(
                    "model '{}' returned {} importances for {} features",
                    model_cfg.kind,
                    values.len(),
                    table.n_features()
                )))
            }
            None => BTreeMap::new(),
        };

        let predictions = test_idx
            .iter()
            .zip(predicted.iter().zip(&y_test))
            .map(|(&r, (&predicted, &actual))| Prediction {
                index: fold.train.start + r,
                ts: window[r].ts,
                predicted,
                actual,
            })
            .collect();

        info!(
            fold_id,
            train_rows = x_train.len(),
            test_rows = x_test.len(),
            "fold complete"
        );

        Ok(ExecutedFold {
            result: FoldResult {
                fold_id,
                train_range: fold.train.clone(),
                test_range: fold.test.clone(),
                train_size: x_train.len(),
                test_size: x_test.len(),
                metrics,
                predictions,
                feature_importances,
            },
            model_state: model.snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigResolver;
    use crate::evaluation::splitter::split;
    use crate::storage::Bar;
    use crate::strategy::FeatureTable;
    use serde_json::json;

    fn data(n: usize) -> MarketData {
        let bars = (0..n)
            .map(|i| {
                let t = f64::from(u32::try_from(i).unwrap());
                let close = 100.0 * (1.0 + 0.15 * (t / 9.0).sin());
                Bar {
                    ts: i64::from(u32::try_from(i).unwrap()) * 3600,
                    open: close,
                    high: close * 1.01,
                    low: close * 0.99,
                    close,
                    volume: 1.0,
                }
            })
            .collect();
        MarketData::new(bars)
    }

    fn config(overrides: &[&str]) -> RunConfig {
        let base = json!({
            "data": {},
            "features": {"sets": ["returns", "range"]},
            "label": {"strategy": "reversal", "T": 5, "X": 0.05},
            "model": {"type": "centroid", "params": {"feature_fraction": 1.0}},
            "evaluation": {"init_train": 100, "oos_window": 25, "step": 25,
                           "metrics": ["accuracy", "f1_macro"]},
            "seed": 11
        });
        ConfigResolver::new(&StrategyCatalog::default())
            .resolve(&base, &serde_json::Value::Null, overrides)
            .unwrap()
    }

    #[test]
    fn test_execute_fold() {
        let catalog = StrategyCatalog::default();
        let config = config(&[]);
        let data = data(200);
        let fold = split(200, 100, 25, 25).unwrap().nth(1).unwrap();
        let executed = FoldExecutor::from_catalog(&config, &catalog)
            .execute(&fold, &data)
            .unwrap();
        let result = executed.result;

        assert_eq!(result.fold_id, 1);
        // 13 warm-up rows (close_pos_14), 5 purged horizon rows
        assert_eq!(result.train_size, 125 - 13 - 5);
        // all test rows but the last 5 have a full horizon inside the slice
        assert_eq!(result.test_size, 20);
        assert_eq!(result.predictions.first().unwrap().index, 125);
        assert!(result.predictions.iter().all(|p| fold.test.contains(&p.index)));
        assert_eq!(result.metrics.len(), 2);
        assert_eq!(result.feature_importances.len(), 5);
        assert!(executed.model_state.is_some());
    }

    #[test]
    fn test_drop_policy_keeps_leading_gap_rows_out() {
        let catalog = StrategyCatalog::default();
        let config = config(&["features.missing=drop"]);
        let fold = split(200, 100, 25, 25).unwrap().next().unwrap();
        let result = FoldExecutor::from_catalog(&config, &catalog)
            .execute(&fold, &data(200))
            .unwrap()
            .result;
        assert_eq!(result.train_size, 100 - 13 - 5);
    }

    #[test]
    fn test_horizon_longer_than_train_is_fold_local() {
        let catalog = StrategyCatalog::default();
        let config = config(&["label.T=150"]);
        let fold = split(200, 100, 25, 25).unwrap().next().unwrap();
        let executor = FoldExecutor::from_catalog(&config, &catalog);
        let err = executor.execute(&fold, &data(200)).unwrap_err();
        assert!(err.is_fold_local());

        let (outcome, state) = executor.run(&fold, &data(200)).unwrap();
        assert!(matches!(outcome, FoldOutcome::Failed { fold_id: 0, .. }));
        assert!(state.is_none());
    }

    #[test]
    fn test_no_test_labels_is_fold_local() {
        let catalog = StrategyCatalog::default();
        let config = config(&["label.T=30"]);
        // test window of 25 rows, horizon 30: nothing in the test range is labelled
        let fold = split(200, 100, 25, 25).unwrap().next().unwrap();
        let (outcome, _) = FoldExecutor::from_catalog(&config, &catalog)
            .run(&fold, &data(200))
            .unwrap();
        assert!(outcome.result().is_none());
    }

    #[test]
    fn test_same_seed_same_result() {
        let catalog = StrategyCatalog::default();
        let config = config(&["model.params.feature_fraction=0.5"]);
        let data = data(200);
        let fold = split(200, 100, 25, 25).unwrap().nth(2).unwrap();
        let executor = FoldExecutor::from_catalog(&config, &catalog);
        let a = executor.execute(&fold, &data).unwrap();
        let b = executor.execute(&fold, &data).unwrap();
        assert_eq!(a, b);
    }

    struct ShortFeatures;

    impl FeatureProvider for ShortFeatures {
        fn compute(&self, bars: &[Bar], _sets: &[String]) -> Result<FeatureTable> {
            Ok(FeatureTable::new(bars.len() - 1))
        }
    }

    #[test]
    fn test_misaligned_features_are_fatal() {
        let catalog = StrategyCatalog::default();
        let config = config(&[]);
        let fold = split(200, 100, 25, 25).unwrap().next().unwrap();
        let executor = FoldExecutor::new(&config, &ShortFeatures, &catalog, &catalog);
        let err = executor.run(&fold, &data(200)).unwrap_err();
        assert!(matches!(err, Error::Strategy(_)));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = FoldOutcome::Failed {
            fold_id: 3,
            reason: "empty".to_string(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value, json!({"status": "failed", "fold_id": 3, "reason": "empty"}));
    }
}
