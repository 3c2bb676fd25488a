//! Run configuration
//!
//! A run is described by a dynamic tree (TOML or JSON) that is resolved once
//! into an immutable, typed [`RunConfig`]:
//!
//! 1. deep-merge an experiment overlay onto a base config
//! 2. apply dotted-path overrides (`label.T=21`)
//! 3. deserialize into typed sections, filling defaults
//! 4. validate strategy names and parameters against a [`StrategyCatalog`]
//! 5. hash the canonical JSON of the typed config
//!
//! The hash covers the typed form, so equivalent inputs (different key order,
//! omitted defaults, disjoint overrides in any order) hash identically.

pub mod overrides;

use crate::evaluation::metrics::{self, KNOWN_METRICS};
use crate::strategy::{Params, StrategyCatalog};
use crate::{Error, Result};
use overrides::{canonicalize, deep_merge, Override};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sections that must be present after merging
pub const REQUIRED_SECTIONS: [&str; 5] = ["data", "label", "model", "evaluation", "seed"];

/// `experiment` section: naming and grouping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSection {
    /// Human-readable run name, slugged into the experiment id
    #[serde(default = "default_name")]
    pub name: String,
    /// Workspace grouping directory
    #[serde(default = "default_category")]
    pub category: String,
    /// Free-form tags for registry queries
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

impl Default for ExperimentSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            category: default_category(),
            tags: Vec::new(),
            description: String::new(),
        }
    }
}

/// `data` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSection {
    /// CSV or Parquet file with OHLCV bars
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// How rows with missing feature values are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Drop every row with a missing feature
    Drop,
    /// Forward-fill inside the fold slice, then drop what remains
    #[default]
    FfillThenDrop,
}

/// `features` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSection {
    /// Feature set names, in column order
    #[serde(default)]
    pub sets: Vec<String>,
    /// Missing-value policy
    #[serde(default)]
    pub missing: MissingPolicy,
}

/// `label` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSection {
    /// Label strategy name
    pub strategy: String,
    /// Strategy parameters (every other key in the section)
    #[serde(flatten)]
    pub params: Params,
}

/// `model` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    /// Model type name
    #[serde(rename = "type")]
    pub kind: String,
    /// Model parameters
    #[serde(default)]
    pub params: Params,
}

/// `evaluation` section: walk-forward geometry and metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Rows in the first training window
    #[serde(default = "default_init_train")]
    pub init_train: usize,
    /// Rows per test window
    #[serde(default = "default_oos_window")]
    pub oos_window: usize,
    /// Training window growth per fold
    #[serde(default = "default_step")]
    pub step: usize,
    /// Metric names computed per fold
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            init_train: default_init_train(),
            oos_window: default_oos_window(),
            step: default_step(),
            metrics: default_metrics(),
        }
    }
}

fn default_name() -> String {
    "unnamed".to_string()
}

fn default_category() -> String {
    "default".to_string()
}

const fn default_init_train() -> usize {
    1500
}

const fn default_oos_window() -> usize {
    63
}

const fn default_step() -> usize {
    21
}

fn default_metrics() -> Vec<String> {
    KNOWN_METRICS.iter().map(ToString::to_string).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sections {
    #[serde(default)]
    experiment: ExperimentSection,
    data: DataSection,
    #[serde(default)]
    features: FeatureSection,
    label: LabelSection,
    model: ModelSection,
    evaluation: EvaluationConfig,
    seed: u64,
}

/// Immutable, validated run specification
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    sections: Sections,
    hash: String,
}

impl RunConfig {
    /// `experiment` section
    #[must_use]
    pub const fn experiment(&self) -> &ExperimentSection {
        &self.sections.experiment
    }

    /// `data` section
    #[must_use]
    pub const fn data(&self) -> &DataSection {
        &self.sections.data
    }

    /// `features` section
    #[must_use]
    pub const fn features(&self) -> &FeatureSection {
        &self.sections.features
    }

    /// `label` section
    #[must_use]
    pub const fn label(&self) -> &LabelSection {
        &self.sections.label
    }

    /// `model` section
    #[must_use]
    pub const fn model(&self) -> &ModelSection {
        &self.sections.model
    }

    /// `evaluation` section
    #[must_use]
    pub const fn evaluation(&self) -> &EvaluationConfig {
        &self.sections.evaluation
    }

    /// Base random seed
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.sections.seed
    }

    /// SHA-256 (hex) of the canonical JSON form
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Canonical JSON tree (sorted keys), as snapshotted into the workspace
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<Value> {
        Ok(canonicalize(&serde_json::to_value(&self.sections)?))
    }

    /// A new config with `overrides` applied on top of this one
    ///
    /// # Errors
    /// Returns error under the same conditions as [`ConfigResolver::resolve`]
    pub fn with_overrides<S: AsRef<str>>(
        &self,
        overrides: &[S],
        catalog: &StrategyCatalog,
    ) -> Result<Self> {
        ConfigResolver::new(catalog).resolve(&self.to_json()?, &Value::Null, overrides)
    }
}

/// Merges, overrides, types, validates and hashes run configs
#[derive(Debug, Clone, Copy)]
pub struct ConfigResolver<'a> {
    catalog: &'a StrategyCatalog,
}

impl<'a> ConfigResolver<'a> {
    /// Resolver validating against `catalog`
    #[must_use]
    pub const fn new(catalog: &'a StrategyCatalog) -> Self {
        Self { catalog }
    }

    /// Resolve `overlay` (may be `Value::Null`) onto `base`, then apply
    /// `overrides` in order.
    ///
    /// # Errors
    /// Returns `Error::Config` if a required section is missing, an override
    /// path does not exist or does not fit, a name is not registered, or a
    /// value is invalid
    pub fn resolve<S: AsRef<str>>(
        &self,
        base: &Value,
        overlay: &Value,
        overrides: &[S],
    ) -> Result<RunConfig> {
        let mut tree = if overlay.is_null() {
            base.clone()
        } else {
            deep_merge(base, overlay)
        };
        let Value::Object(map) = &tree else {
            return Err(Error::Config("config root must be a mapping".to_string()));
        };
        for section in REQUIRED_SECTIONS {
            if map.get(section).map_or(true, Value::is_null) {
                return Err(Error::Config(format!("missing required section '{section}'")));
            }
        }

        for text in overrides {
            let o = Override::parse(text.as_ref())?;
            o.apply(&mut tree)?;
            debug!(path = %o.path(), value = o.literal(), "override applied");
        }

        let sections: Sections = serde_json::from_value(tree)
            .map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        self.validate(&sections)?;

        let canonical = canonicalize(&serde_json::to_value(&sections)?);
        let hash = hex::encode(Sha256::digest(serde_json::to_string(&canonical)?.as_bytes()));
        debug!(hash = %hash, name = %sections.experiment.name, "config resolved");
        Ok(RunConfig { sections, hash })
    }

    /// Load and resolve config files
    ///
    /// # Errors
    /// Returns error if a file cannot be read or parsed, or resolution fails
    pub fn resolve_files<S: AsRef<str>>(
        &self,
        base: &Path,
        overlay: Option<&Path>,
        overrides: &[S],
    ) -> Result<RunConfig> {
        let base = load_file(base)?;
        let overlay = overlay.map(load_file).transpose()?.unwrap_or(Value::Null);
        self.resolve(&base, &overlay, overrides)
    }

    fn validate(&self, sections: &Sections) -> Result<()> {
        for name in &sections.features.sets {
            self.catalog.feature_set(name)?;
        }
        self.catalog
            .label_strategy(&sections.label.strategy)?
            .horizon(&sections.label.params)?;
        self.catalog
            .model_builder(&sections.model.kind)?
            .validate(&sections.model.params)?;

        let eval = &sections.evaluation;
        if eval.init_train == 0 || eval.oos_window == 0 || eval.step == 0 {
            return Err(Error::Config(
                "evaluation init_train, oos_window and step must be positive".to_string(),
            ));
        }
        if eval.metrics.is_empty() {
            return Err(Error::Config("evaluation.metrics must not be empty".to_string()));
        }
        if let Some(unknown) = eval.metrics.iter().find(|m| !metrics::is_known(m)) {
            return Err(Error::Config(format!(
                "unknown metric '{unknown}', available: {KNOWN_METRICS:?}"
            )));
        }
        Ok(())
    }
}

/// Read a `.toml` or `.json` config file into the dynamic tree
///
/// # Errors
/// Returns error if the file cannot be read or parsed, or has another extension
pub fn load_file(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read config {}: {e}", path.display())))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => {
            let table: toml::Table = toml::from_str(&text)?;
            Ok(serde_json::to_value(table)?)
        }
        Some("json") => Ok(serde_json::from_str(&text)?),
        _ => Err(Error::Config(format!(
            "unsupported config format: {} (expected .toml or .json)",
            path.display()
        ))),
    }
}
