//! Pluggable feature, label and model strategies
//!
//! The evaluation core only talks to three narrow interfaces:
//!
//! ```text
//! FeatureProvider  compute(slice, feature_sets) -> FeatureTable
//! LabelProvider    horizon(strategy, params), compute(slice, strategy, params)
//! ModelFactory     create(model_type, params, seed) -> Box<dyn Model>
//! ```
//!
//! [`StrategyCatalog`] implements all three on top of a `name -> impl`
//! mapping. New strategies register a name/implementation pair; the config
//! resolver checks names against the catalog before a run starts.

pub mod features;
pub mod labels;
pub mod models;

use crate::storage::Bar;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Class label produced by label strategies and predicted by models
pub type Label = i32;

/// Loosely-typed strategy parameters as they appear in the run config
pub type Params = BTreeMap<String, serde_json::Value>;

/// Numeric feature columns aligned to a data slice
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    n_rows: usize,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl FeatureTable {
    /// Create an empty table for `n_rows` rows
    #[must_use]
    pub const fn new(n_rows: usize) -> Self {
        Self {
            n_rows,
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Append a column.
    ///
    /// # Errors
    /// Returns error if the column length differs from the table or the name
    /// is already taken
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.n_rows {
            return Err(Error::Strategy(format!(
                "feature '{name}' has {} rows, expected {}",
                values.len(),
                self.n_rows
            )));
        }
        if self.names.contains(&name) {
            return Err(Error::Strategy(format!("duplicate feature column '{name}'")));
        }
        self.names.push(name);
        self.columns.push(values);
        Ok(())
    }

    /// Number of rows
    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of feature columns
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    /// Column names in order
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Column by name
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.columns[idx].as_slice())
    }

    /// Whether every feature in `row` is finite
    #[must_use]
    pub fn row_is_complete(&self, row: usize) -> bool {
        self.columns.iter().all(|c| c[row].is_finite())
    }

    /// Materialize the given rows as row-major vectors
    #[must_use]
    pub fn rows(&self, indices: &[usize]) -> Vec<Vec<f64>> {
        indices
            .iter()
            .map(|&r| self.columns.iter().map(|c| c[r]).collect())
            .collect()
    }

    /// Replace non-finite values with the last finite value above them.
    ///
    /// Leading gaps (warm-up rows) stay non-finite.
    pub fn forward_fill(&mut self) {
        for column in &mut self.columns {
            let mut last = f64::NAN;
            for value in column.iter_mut() {
                if value.is_finite() {
                    last = *value;
                } else {
                    *value = last;
                }
            }
        }
    }
}

/// A named group of trailing-window features.
///
/// Implementations must only look backwards: the value at row `t` may depend
/// on rows `..=t` of the slice, never on later rows.
pub trait FeatureSet: Send + Sync {
    /// Names of the columns produced, in order
    fn columns(&self) -> Vec<String>;

    /// One vector per column, `bars.len()` long; `NaN` where lookback is short
    fn compute(&self, bars: &[Bar]) -> Vec<Vec<f64>>;
}

/// A forward-looking label definition
pub trait LabelStrategy: Send + Sync {
    /// Number of rows after `t` the label at `t` looks at
    ///
    /// # Errors
    /// Returns error if the parameters are invalid
    fn horizon(&self, params: &Params) -> Result<usize>;

    /// Label per row; `None` where the horizon runs past the slice
    ///
    /// # Errors
    /// Returns error if the parameters are invalid
    fn compute(&self, bars: &[Bar], params: &Params) -> Result<Vec<Option<Label>>>;
}

/// A trainable classifier
pub trait Model: Send {
    /// Fit on row-major features
    ///
    /// # Errors
    /// Returns error if the training set is unusable
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()>;

    /// One prediction per row
    ///
    /// # Errors
    /// Returns error if called before `fit`
    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<Label>>;

    /// Per-feature importance aligned with the training columns, if supported
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    /// Serialized fitted state, if supported
    fn snapshot(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Builds fresh model instances for one model type
pub trait ModelBuilder: Send + Sync {
    /// Check parameters without building
    ///
    /// # Errors
    /// Returns error if the parameters are invalid
    fn validate(&self, params: &Params) -> Result<()>;

    /// Build an unfitted model seeded with `seed`
    ///
    /// # Errors
    /// Returns error if the parameters are invalid
    fn build(&self, params: &Params, seed: u64) -> Result<Box<dyn Model>>;
}

/// Computes the feature table for a data slice
pub trait FeatureProvider: Sync {
    /// Features for `bars`, one row per bar
    ///
    /// # Errors
    /// Returns error if a feature set is unknown or misbehaves
    fn compute(&self, bars: &[Bar], feature_sets: &[String]) -> Result<FeatureTable>;
}

/// Computes labels for a data slice
pub trait LabelProvider: Sync {
    /// Forward horizon implied by `params`
    ///
    /// # Errors
    /// Returns error if the strategy is unknown or the parameters are invalid
    fn horizon(&self, strategy: &str, params: &Params) -> Result<usize>;

    /// Labels aligned to `bars`
    ///
    /// # Errors
    /// Returns error if the strategy is unknown or the parameters are invalid
    fn compute(&self, bars: &[Bar], strategy: &str, params: &Params) -> Result<Vec<Option<Label>>>;
}

/// Creates model instances by type name
pub trait ModelFactory: Sync {
    /// Fresh, unfitted model
    ///
    /// # Errors
    /// Returns error if the model type is unknown or the parameters are invalid
    fn create(&self, model_type: &str, params: &Params, seed: u64) -> Result<Box<dyn Model>>;
}

/// Name → implementation mapping for every strategy kind.
///
/// `StrategyCatalog::default()` contains the built-in strategies; use
/// [`StrategyCatalog::empty`] to start from nothing.
#[derive(Clone)]
pub struct StrategyCatalog {
    feature_sets: BTreeMap<String, Arc<dyn FeatureSet>>,
    label_strategies: BTreeMap<String, Arc<dyn LabelStrategy>>,
    model_builders: BTreeMap<String, Arc<dyn ModelBuilder>>,
}

impl StrategyCatalog {
    /// Catalog with no strategies registered
    #[must_use]
    pub fn empty() -> Self {
        Self {
            feature_sets: BTreeMap::new(),
            label_strategies: BTreeMap::new(),
            model_builders: BTreeMap::new(),
        }
    }

    /// Catalog with the built-in feature sets, reversal label and models
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::empty()
            .with_feature_set("returns", features::Returns)
            .with_feature_set("volatility", features::Volatility)
            .with_feature_set("range", features::Range)
            .with_label_strategy("reversal", labels::Reversal)
            .with_model("centroid", models::CentroidBuilder)
            .with_model("majority", models::MajorityBuilder)
    }

    /// Register a feature set under `name`
    #[must_use]
    pub fn with_feature_set(mut self, name: impl Into<String>, set: impl FeatureSet + 'static) -> Self {
        self.feature_sets.insert(name.into(), Arc::new(set));
        self
    }

    /// Register a label strategy under `name`
    #[must_use]
    pub fn with_label_strategy(
        mut self,
        name: impl Into<String>,
        strategy: impl LabelStrategy + 'static,
    ) -> Self {
        self.label_strategies.insert(name.into(), Arc::new(strategy));
        self
    }

    /// Register a model builder under `name`
    #[must_use]
    pub fn with_model(mut self, name: impl Into<String>, builder: impl ModelBuilder + 'static) -> Self {
        self.model_builders.insert(name.into(), Arc::new(builder));
        self
    }

    /// Look up a feature set
    ///
    /// # Errors
    /// Returns a config error listing the registered names
    pub fn feature_set(&self, name: &str) -> Result<&Arc<dyn FeatureSet>> {
        self.feature_sets
            .get(name)
            .ok_or_else(|| unknown("feature set", name, self.feature_sets.keys()))
    }

    /// Look up a label strategy
    ///
    /// # Errors
    /// Returns a config error listing the registered names
    pub fn label_strategy(&self, name: &str) -> Result<&Arc<dyn LabelStrategy>> {
        self.label_strategies
            .get(name)
            .ok_or_else(|| unknown("label strategy", name, self.label_strategies.keys()))
    }

    /// Look up a model builder
    ///
    /// # Errors
    /// Returns a config error listing the registered names
    pub fn model_builder(&self, name: &str) -> Result<&Arc<dyn ModelBuilder>> {
        self.model_builders
            .get(name)
            .ok_or_else(|| unknown("model type", name, self.model_builders.keys()))
    }

    /// Registered feature set names
    #[must_use]
    pub fn feature_set_names(&self) -> Vec<&str> {
        self.feature_sets.keys().map(String::as_str).collect()
    }

    /// Registered label strategy names
    #[must_use]
    pub fn label_strategy_names(&self) -> Vec<&str> {
        self.label_strategies.keys().map(String::as_str).collect()
    }

    /// Registered model type names
    #[must_use]
    pub fn model_names(&self) -> Vec<&str> {
        self.model_builders.keys().map(String::as_str).collect()
    }
}

impl Default for StrategyCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for StrategyCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyCatalog")
            .field("feature_sets", &self.feature_set_names())
            .field("label_strategies", &self.label_strategy_names())
            .field("model_builders", &self.model_names())
            .finish()
    }
}

fn unknown<'a>(kind: &str, name: &str, available: impl Iterator<Item = &'a String>) -> Error {
    let available: Vec<&str> = available.map(String::as_str).collect();
    Error::Config(format!("{kind} '{name}' is not registered, available: {available:?}"))
}

impl FeatureProvider for StrategyCatalog {
    fn compute(&self, bars: &[Bar], feature_sets: &[String]) -> Result<FeatureTable> {
        let mut table = FeatureTable::new(bars.len());
        for set_name in feature_sets {
            let set = self.feature_set(set_name)?;
            let names = set.columns();
            let columns = set.compute(bars);
            if names.len() != columns.len() {
                return Err(Error::Strategy(format!(
                    "feature set '{set_name}' declared {} columns but produced {}",
                    names.len(),
                    columns.len()
                )));
            }
            for (name, values) in names.into_iter().zip(columns) {
                table.push_column(name, values)?;
            }
        }
        Ok(table)
    }
}

impl LabelProvider for StrategyCatalog {
    fn horizon(&self, strategy: &str, params: &Params) -> Result<usize> {
        self.label_strategy(strategy)?.horizon(params)
    }

    fn compute(&self, bars: &[Bar], strategy: &str, params: &Params) -> Result<Vec<Option<Label>>> {
        self.label_strategy(strategy)?.compute(bars, params)
    }
}

impl ModelFactory for StrategyCatalog {
    fn create(&self, model_type: &str, params: &Params, seed: u64) -> Result<Box<dyn Model>> {
        self.model_builder(model_type)?.build(params, seed)
    }
}

/// Read an unsigned integer parameter, falling back to `default`
///
/// # Errors
/// Returns a config error if the value is present but not a non-negative integer
pub fn param_usize(params: &Params, key: &str, default: usize) -> Result<usize> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| {
                Error::Config(format!("parameter '{key}' must be a non-negative integer, got {value}"))
            }),
    }
}

/// Read a float parameter, falling back to `default`
///
/// # Errors
/// Returns a config error if the value is present but not numeric
pub fn param_f64(params: &Params, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| Error::Config(format!("parameter '{key}' must be a number, got {value}"))),
    }
}
