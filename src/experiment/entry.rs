//! Registry Entry - one experiment in the shared index

use super::CodeRevision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Lifecycle status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Registered, folds executing.
    Running,
    /// Aggregated and persisted.
    Completed,
    /// Aborted; see the entry's error.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Registry Entry summarizes one experiment for listing and comparison.
///
/// Created in `Running` state when a run starts; [`RegistryEntry::finish`]
/// records the terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryEntry {
    experiment_id: String,
    name: String,
    #[serde(default)]
    description: String,
    category: String,
    #[serde(default)]
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    duration_seconds: Option<f64>,
    status: RunStatus,
    #[serde(default)]
    summary_metrics: BTreeMap<String, f64>,
    workspace_path: PathBuf,
    config_hash: String,
    code_revision: Option<CodeRevision>,
    seed: u64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    seq: u64,
}

impl RegistryEntry {
    /// Create a builder with the required fields.
    #[must_use]
    pub fn builder(experiment_id: impl Into<String>, name: impl Into<String>) -> RegistryEntryBuilder {
        RegistryEntryBuilder::new(experiment_id, name)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Get the category.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Get the tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Wall-clock duration, once finished.
    #[must_use]
    pub const fn duration_seconds(&self) -> Option<f64> {
        self.duration_seconds
    }

    /// Get the status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Mean of each metric across succeeded folds.
    #[must_use]
    pub const fn summary_metrics(&self) -> &BTreeMap<String, f64> {
        &self.summary_metrics
    }

    /// Get the workspace directory.
    #[must_use]
    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    /// Get the config hash.
    #[must_use]
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Git revision at launch, if known.
    #[must_use]
    pub const fn code_revision(&self) -> Option<&CodeRevision> {
        self.code_revision.as_ref()
    }

    /// Get the base seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Failure reason, if failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Registration order within the registry.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Numeric field used for sorting: `duration_seconds`, `seed`, `seq`,
    /// `created_at` (unix seconds) or any summary metric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sort_value(&self, key: &str) -> Option<f64> {
        match key {
            "duration_seconds" => self.duration_seconds,
            "seed" => Some(self.seed as f64),
            "seq" => Some(self.seq as f64),
            "created_at" => Some(self.created_at.timestamp() as f64),
            metric => self.summary_metrics.get(metric).copied(),
        }
    }

    pub(crate) fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    /// Record a terminal (or any) status with its metrics and timing.
    pub fn finish(
        &mut self,
        status: RunStatus,
        summary_metrics: BTreeMap<String, f64>,
        duration_seconds: Option<f64>,
        error: Option<String>,
    ) {
        self.status = status;
        self.summary_metrics = summary_metrics;
        self.duration_seconds = duration_seconds;
        self.error = error;
    }
}

/// Builder for `RegistryEntry`.
#[derive(Debug)]
pub struct RegistryEntryBuilder {
    experiment_id: String,
    name: String,
    description: String,
    category: String,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    workspace_path: PathBuf,
    config_hash: String,
    code_revision: Option<CodeRevision>,
    seed: u64,
}

impl RegistryEntryBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            description: String::new(),
            category: "default".to_string(),
            tags: Vec::new(),
            created_at: Utc::now(),
            workspace_path: PathBuf::new(),
            config_hash: String::new(),
            code_revision: None,
            seed: 0,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the category.
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the tags.
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the creation timestamp.
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Set the workspace directory.
    #[must_use]
    pub fn workspace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_path = path.into();
        self
    }

    /// Set the config hash.
    #[must_use]
    pub fn config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Set the code revision.
    #[must_use]
    pub fn code_revision(mut self, revision: Option<CodeRevision>) -> Self {
        self.code_revision = revision;
        self
    }

    /// Set the base seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Build a `Running` entry.
    #[must_use]
    pub fn build(self) -> RegistryEntry {
        RegistryEntry {
            experiment_id: self.experiment_id,
            name: self.name,
            description: self.description,
            category: self.category,
            tags: self.tags,
            created_at: self.created_at,
            duration_seconds: None,
            status: RunStatus::Running,
            summary_metrics: BTreeMap::new(),
            workspace_path: self.workspace_path,
            config_hash: self.config_hash,
            code_revision: self.code_revision,
            seed: self.seed,
            error: None,
            seq: 0,
        }
    }
}
