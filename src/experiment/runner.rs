//! End-to-end experiment execution
//!
//! ```text
//! RunIdentity::create ─> Registry::register (running)
//!     ─> load data ─> WindowSplitter ─> FoldExecutor per fold
//!     ─> Aggregator ─> artifacts ─> Registry::update_status (completed)
//! ```
//!
//! Any error after registration marks the entry `failed` with the error
//! message before it is returned.

use super::{ArtifactStore, CodeRevision, Registry, RegistryEntry, RunIdentity, RunStatus};
use crate::config::RunConfig;
use crate::evaluation::{AggregateResult, Aggregator, Fold, FoldExecutor, FoldOutcome, WindowSplitter};
use crate::storage::MarketData;
use crate::strategy::StrategyCatalog;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
#[cfg(not(feature = "parallel"))]
use tracing::warn;
use tracing::{error, info, info_span};

/// Cooperative cancellation flag, checked before each fold starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Execution knobs that do not change results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Execute folds on the rayon pool (needs the `parallel` feature)
    pub parallel_folds: bool,
}

/// A completed run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Experiment id
    pub experiment_id: String,
    /// Workspace directory
    pub workspace: PathBuf,
    /// Outcome of every fold, by fold id
    pub folds: Vec<FoldOutcome>,
    /// Cross-fold aggregate
    pub aggregate: AggregateResult,
    /// Wall-clock duration
    pub duration_seconds: f64,
}

#[derive(Debug, Serialize)]
struct RunMeta<'a> {
    experiment_id: &'a str,
    name: &'a str,
    category: &'a str,
    tags: &'a [String],
    description: &'a str,
    seed: u64,
    config_hash: &'a str,
    code_revision: Option<&'a CodeRevision>,
    created_at: DateTime<Utc>,
    crate_version: &'static str,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    experiment_id: &'a str,
    status: RunStatus,
    duration_seconds: f64,
    error: Option<String>,
}

/// Runs experiments into a workspace root shared with a registry
#[derive(Debug)]
pub struct ExperimentRunner<'a> {
    root: PathBuf,
    registry: Registry,
    catalog: &'a StrategyCatalog,
    options: RunnerOptions,
    cancel: CancelToken,
}

impl<'a> ExperimentRunner<'a> {
    /// Runner writing workspaces and the registry under `root`
    ///
    /// # Errors
    /// Returns error if the root cannot be created
    pub fn new(root: impl Into<PathBuf>, catalog: &'a StrategyCatalog) -> Result<Self> {
        let root = root.into();
        Ok(Self {
            registry: Registry::open(&root)?,
            root,
            catalog,
            options: RunnerOptions::default(),
            cancel: CancelToken::new(),
        })
    }

    /// Replace the options
    #[must_use]
    pub const fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Share a cancellation token
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Registry this runner records into
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Workspace root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run with data loaded from `data.path`.
    ///
    /// # Errors
    /// Returns the first fatal error; the registry entry is marked failed
    /// if registration already happened
    pub fn run(&self, config: &RunConfig) -> Result<RunOutcome> {
        self.execute(config, None)
    }

    /// Run against already loaded data (`data.path` is ignored).
    ///
    /// # Errors
    /// Returns the first fatal error; the registry entry is marked failed
    /// if registration already happened
    pub fn run_with_data(&self, config: &RunConfig, data: &MarketData) -> Result<RunOutcome> {
        self.execute(config, Some(data))
    }

    fn execute(&self, config: &RunConfig, data: Option<&MarketData>) -> Result<RunOutcome> {
        let started = Instant::now();
        let identity = RunIdentity::create(config, &self.root)?;
        let id = identity.experiment_id();
        let span = info_span!("experiment", experiment_id = %id);
        let _guard = span.enter();

        let store = ArtifactStore::new(identity.workspace(), id);
        let revision = std::env::current_dir()
            .ok()
            .and_then(|dir| CodeRevision::detect(&dir));
        let experiment = config.experiment();
        store.put_json(
            "meta.json",
            &RunMeta {
                experiment_id: id,
                name: &experiment.name,
                category: &experiment.category,
                tags: &experiment.tags,
                description: &experiment.description,
                seed: config.seed(),
                config_hash: config.hash(),
                code_revision: revision.as_ref(),
                created_at: identity.created_at(),
                crate_version: env!("CARGO_PKG_VERSION"),
            },
        )?;

        self.registry.register(
            RegistryEntry::builder(id, &experiment.name)
                .description(&experiment.description)
                .category(&experiment.category)
                .tags(experiment.tags.iter().cloned())
                .created_at(identity.created_at())
                .workspace_path(identity.workspace())
                .config_hash(config.hash())
                .code_revision(revision)
                .seed(config.seed())
                .build(),
        )?;
        info!(name = %experiment.name, "experiment started");

        let result = match data {
            Some(data) => self.evaluate(config, data, &store),
            None => self.load_data(config).and_then(|data| self.evaluate(config, &data, &store)),
        };
        let duration_seconds = started.elapsed().as_secs_f64();

        match result {
            Ok((folds, aggregate)) => {
                self.registry.update_status(
                    id,
                    RunStatus::Completed,
                    aggregate.summary_metrics(),
                    Some(duration_seconds),
                )?;
                store.put_json(
                    "status.json",
                    &RunSummary {
                        experiment_id: id,
                        status: RunStatus::Completed,
                        duration_seconds,
                        error: None,
                    },
                )?;
                info!(
                    duration_seconds,
                    succeeded = aggregate.n_succeeded_folds,
                    failed = aggregate.n_failed_folds,
                    "experiment completed"
                );
                Ok(RunOutcome {
                    experiment_id: id.to_string(),
                    workspace: identity.workspace().to_path_buf(),
                    folds,
                    aggregate,
                    duration_seconds,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                error!(error = %reason, "experiment failed");
                if let Err(mark) = self.registry.mark_failed(id, &reason, Some(duration_seconds)) {
                    error!(error = %mark, "could not mark experiment failed");
                }
                let summary = RunSummary {
                    experiment_id: id,
                    status: RunStatus::Failed,
                    duration_seconds,
                    error: Some(reason),
                };
                if let Err(write) = store.put_json("status.json", &summary) {
                    error!(error = %write, "could not write run status");
                }
                Err(e)
            }
        }
    }

    fn load_data(&self, config: &RunConfig) -> Result<MarketData> {
        let path = config
            .data()
            .path
            .as_ref()
            .ok_or_else(|| Error::Config("data.path is not set".to_string()))?;
        let data = MarketData::load(path)?;
        info!(path = %path.display(), rows = data.len(), "market data loaded");
        Ok(data)
    }

    fn evaluate(
        &self,
        config: &RunConfig,
        data: &MarketData,
        store: &ArtifactStore,
    ) -> Result<(Vec<FoldOutcome>, AggregateResult)> {
        let folds: Vec<Fold> = WindowSplitter::from_config(config.evaluation())?
            .split(data.len())?
            .collect();
        info!(rows = data.len(), folds = folds.len(), "walk-forward split");

        let executor = FoldExecutor::from_catalog(config, self.catalog);
        let executed = self.run_folds(&executor, &folds, data, store)?;

        let mut outcomes = Vec::with_capacity(executed.len());
        let mut last_model = None;
        for (outcome, model_state) in executed {
            if model_state.is_some() {
                last_model = model_state;
            }
            outcomes.push(outcome);
        }

        let aggregate = Aggregator::new(config.evaluation().metrics.clone()).aggregate(&outcomes)?;
        store.put_json("aggregate.json", &aggregate)?;
        store.put_text("fold_metrics.csv", &fold_metrics_csv(&outcomes, &config.evaluation().metrics))?;
        store.put_text("predictions.csv", &predictions_csv(&aggregate))?;
        store.put_text("feature_importance.csv", &importance_csv(&aggregate))?;
        if let Some(state) = last_model {
            store.put_json("model.json", &state)?;
        }
        Ok((outcomes, aggregate))
    }

    /// Execute folds in `fold_id` order, writing `folds/fold_NNN.json` as
    /// each one finishes.
    ///
    /// On the first fatal error the folds completed so far stay on disk.
    fn run_folds(
        &self,
        executor: &FoldExecutor<'_>,
        folds: &[Fold],
        data: &MarketData,
        store: &ArtifactStore,
    ) -> Result<Vec<ExecutedOutcome>> {
        let run_one = |fold: &Fold| {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled(fold.fold_id));
            }
            executor.run(fold, data)
        };

        if self.options.parallel_folds {
            #[cfg(feature = "parallel")]
            {
                use rayon::prelude::*;
                // indexed collect keeps fold order; every worker reports back
                // so finished folds are flushed before the first error
                let results: Vec<Result<ExecutedOutcome>> = folds.par_iter().map(run_one).collect();
                let mut executed = Vec::with_capacity(results.len());
                let mut first_error = None;
                for result in results {
                    match result {
                        Ok(done) => {
                            persist_fold(store, &done.0)?;
                            executed.push(done);
                        }
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                return match first_error {
                    Some(e) => Err(e),
                    None => Ok(executed),
                };
            }
            #[cfg(not(feature = "parallel"))]
            warn!("parallel_folds ignored, built without the `parallel` feature");
        }

        let mut executed = Vec::with_capacity(folds.len());
        for fold in folds {
            let done = run_one(fold)?;
            persist_fold(store, &done.0)?;
            executed.push(done);
        }
        Ok(executed)
    }
}

type ExecutedOutcome = (FoldOutcome, Option<serde_json::Value>);

fn persist_fold(store: &ArtifactStore, outcome: &FoldOutcome) -> Result<()> {
    store.put_json(&format!("folds/fold_{:03}.json", outcome.fold_id()), outcome)?;
    Ok(())
}

fn fold_metrics_csv(outcomes: &[FoldOutcome], metrics: &[String]) -> String {
    let mut out = String::from("fold_id,status,train_size,test_size");
    for name in metrics {
        out.push(',');
        out.push_str(name);
    }
    out.push('\n');
    for outcome in outcomes {
        match outcome {
            FoldOutcome::Completed(result) => {
                let _ = write!(
                    out,
                    "{},completed,{},{}",
                    result.fold_id, result.train_size, result.test_size
                );
                for name in metrics {
                    let value = result.metrics.get(name).copied().unwrap_or(f64::NAN);
                    let _ = write!(out, ",{value}");
                }
            }
            FoldOutcome::Failed { fold_id, .. } => {
                let _ = write!(out, "{fold_id},failed,,");
                for _ in metrics {
                    out.push(',');
                }
            }
        }
        out.push('\n');
    }
    out
}

fn predictions_csv(aggregate: &AggregateResult) -> String {
    let mut out = String::from("index,ts,fold_id,predicted,actual\n");
    for c in &aggregate.combined_predictions {
        let p = &c.prediction;
        let _ = writeln!(out, "{},{},{},{},{}", p.index, p.ts, c.fold_id, p.predicted, p.actual);
    }
    out
}

fn importance_csv(aggregate: &AggregateResult) -> String {
    let mut out = String::from("feature,importance\n");
    for (name, value) in aggregate.ranked_feature_importance() {
        let _ = writeln!(out, "{name},{value}");
    }
    out
}
