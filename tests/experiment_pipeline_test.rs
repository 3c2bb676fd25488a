//! End-to-end experiment runs
//!
//! Config resolution → workspace → walk-forward folds → aggregate →
//! artifacts → registry, against synthetic market data.

mod common;

use reversal_lab::config::ConfigResolver;
use reversal_lab::evaluation::FoldOutcome;
use reversal_lab::experiment::{
    ArtifactStore, CancelToken, ExperimentRunner, RunStatus, RunnerOptions,
};
use reversal_lab::strategy::models::MajorityClassifier;
use reversal_lab::strategy::{Model, ModelBuilder, Params, StrategyCatalog};
use reversal_lab::{Error, Result};
use serde_json::Value;
use tempfile::TempDir;

const ROWS: usize = 300;

#[test]
fn test_run_with_data_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default();
    let config = common::resolve(&[]);
    let data = common::synthetic_data(ROWS);

    let runner = ExperimentRunner::new(temp_dir.path(), &catalog).unwrap();
    let outcome = runner.run_with_data(&config, &data).unwrap();

    // 300 rows, init 150, step 30 → train ends 150,180,...,270
    assert_eq!(outcome.folds.len(), 5);
    assert_eq!(outcome.aggregate.n_folds, 5);
    assert_eq!(outcome.aggregate.n_failed_folds, 0);
    assert!(outcome.experiment_id.starts_with("reversal-baseline_"));
    assert!(outcome.workspace.starts_with(temp_dir.path().join("tests")));

    for name in ["accuracy", "f1_macro", "cohen_kappa"] {
        assert!(outcome.aggregate.per_metric_stats.contains_key(name), "{name}");
        assert!(outcome.aggregate.pooled_metrics.contains_key(name), "{name}");
    }

    // every test row appears once, in index order, and never before its train window ends
    let predictions = &outcome.aggregate.combined_predictions;
    assert!(!predictions.is_empty());
    assert!(predictions.windows(2).all(|w| w[0].prediction.index < w[1].prediction.index));
    for combined in predictions {
        let fold = outcome.folds[combined.fold_id].result().unwrap();
        assert!(fold.test_range.contains(&combined.prediction.index));
        assert!(combined.prediction.index >= fold.train_range.end);
    }

    for file in [
        "config.json",
        "meta.json",
        "status.json",
        "aggregate.json",
        "fold_metrics.csv",
        "predictions.csv",
        "feature_importance.csv",
        "model.json",
        "artifacts.jsonl",
        "folds/fold_000.json",
        "folds/fold_004.json",
    ] {
        assert!(outcome.workspace.join(file).is_file(), "missing {file}");
    }

    let records = ArtifactStore::new(&outcome.workspace, &outcome.experiment_id)
        .records()
        .unwrap();
    assert!(records.iter().any(|r| r.key() == "aggregate.json"));
    assert!(records.iter().all(|r| r.experiment_id() == outcome.experiment_id));
    let store = ArtifactStore::new(&outcome.workspace, &outcome.experiment_id);
    assert!(records.iter().all(|r| store.verify(r).unwrap()));

    let entry = runner.registry().get(&outcome.experiment_id).unwrap().unwrap();
    assert_eq!(entry.status(), RunStatus::Completed);
    assert_eq!(entry.config_hash(), config.hash());
    assert_eq!(entry.seed(), 42);
    let summary = outcome.aggregate.summary_metrics();
    assert_eq!(entry.summary_metrics().len(), summary.len());
    for (name, value) in &summary {
        assert!((entry.summary_metrics()[name] - value).abs() < 1e-12, "{name}");
    }
    assert!(entry.duration_seconds().is_some());
}

#[test]
fn test_config_snapshot_reproduces_hash() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default();
    let config = common::resolve(&["label.T=7"]);
    let outcome = ExperimentRunner::new(temp_dir.path(), &catalog)
        .unwrap()
        .run_with_data(&config, &common::synthetic_data(ROWS))
        .unwrap();

    let snapshot: Value =
        serde_json::from_str(&std::fs::read_to_string(outcome.workspace.join("config.json")).unwrap())
            .unwrap();
    let reloaded = ConfigResolver::new(&catalog)
        .resolve(&snapshot, &Value::Null, &[] as &[&str])
        .unwrap();
    assert_eq!(reloaded.hash(), config.hash());
    assert_eq!(reloaded, config);
}

#[test]
fn test_run_loads_csv_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let csv_path = temp_dir.path().join("bars.csv");
    common::write_csv(&csv_path, ROWS);

    let mut tree = common::base_tree();
    tree["data"]["path"] = Value::String(csv_path.display().to_string());
    let catalog = StrategyCatalog::default();
    let config = ConfigResolver::new(&catalog)
        .resolve(&tree, &Value::Null, &[] as &[&str])
        .unwrap();

    let runner = ExperimentRunner::new(temp_dir.path().join("runs"), &catalog).unwrap();
    let outcome = runner.run(&config).unwrap();
    assert_eq!(outcome.aggregate.n_folds, 5);

    let from_memory = ExperimentRunner::new(temp_dir.path().join("memory"), &catalog)
        .unwrap()
        .run_with_data(&config, &common::synthetic_data(ROWS))
        .unwrap();
    assert_eq!(outcome.aggregate.n_succeeded_folds, from_memory.aggregate.n_succeeded_folds);
}

#[test]
fn test_missing_data_path_marks_failed() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default();
    let runner = ExperimentRunner::new(temp_dir.path(), &catalog).unwrap();

    let err = runner.run(&common::resolve(&[])).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let entries = runner.registry().list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status(), RunStatus::Failed);
    assert!(entries[0].error().unwrap().contains("data.path"));
    assert!(entries[0].workspace_path().join("status.json").is_file());
}

#[test]
fn test_identical_runs_are_deterministic() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default();
    let config = common::resolve(&["model.params.feature_fraction=0.5"]);
    let data = common::synthetic_data(ROWS);
    let runner = ExperimentRunner::new(temp_dir.path(), &catalog).unwrap();

    let first = runner.run_with_data(&config, &data).unwrap();
    let second = runner.run_with_data(&config, &data).unwrap();

    assert_ne!(first.experiment_id, second.experiment_id);
    assert_ne!(first.workspace, second.workspace);
    assert_eq!(first.aggregate, second.aggregate);
    assert_eq!(first.folds, second.folds);
    assert_eq!(runner.registry().list().unwrap().len(), 2);
}

#[test]
fn test_parallel_matches_sequential() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default();
    let config = common::resolve(&[]);
    let data = common::synthetic_data(ROWS);

    let sequential = ExperimentRunner::new(temp_dir.path(), &catalog)
        .unwrap()
        .run_with_data(&config, &data)
        .unwrap();
    let parallel = ExperimentRunner::new(temp_dir.path(), &catalog)
        .unwrap()
        .with_options(RunnerOptions {
            parallel_folds: true,
        })
        .run_with_data(&config, &data)
        .unwrap();

    assert_eq!(sequential.folds, parallel.folds);
    assert_eq!(sequential.aggregate, parallel.aggregate);
}

#[test]
fn test_same_seed_same_hash_and_results() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default();
    let data = common::synthetic_data(ROWS);
    let runner = ExperimentRunner::new(temp_dir.path(), &catalog).unwrap();

    let a = runner.run_with_data(&common::resolve(&["seed=1"]), &data).unwrap();
    let b = runner.run_with_data(&common::resolve(&["seed=1"]), &data).unwrap();
    assert_eq!(a.aggregate, b.aggregate);

    let entries = runner.registry().list().unwrap();
    assert_eq!(entries[0].config_hash(), entries[1].config_hash());
    assert_ne!(
        entries[0].config_hash(),
        common::resolve(&["seed=2"]).hash()
    );
}

#[test]
fn test_insufficient_fold_is_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default();
    // fold 0 trains on 15 rows, all inside the 20-bar volatility warm-up
    let config = common::resolve(&["evaluation.init_train=15"]);
    let outcome = ExperimentRunner::new(temp_dir.path(), &catalog)
        .unwrap()
        .run_with_data(&config, &common::synthetic_data(ROWS))
        .unwrap();

    assert!(matches!(outcome.folds[0], FoldOutcome::Failed { fold_id: 0, .. }));
    assert_eq!(outcome.aggregate.failed_folds, vec![0]);
    assert_eq!(
        outcome.aggregate.n_succeeded_folds + outcome.aggregate.n_failed_folds,
        outcome.aggregate.n_folds
    );
    assert!(outcome.aggregate.n_succeeded_folds > 0);
    assert!(outcome
        .aggregate
        .combined_predictions
        .iter()
        .all(|c| c.fold_id != 0));

    let csv = std::fs::read_to_string(outcome.workspace.join("fold_metrics.csv")).unwrap();
    assert!(csv.lines().nth(1).unwrap().starts_with("0,failed"));
}

#[test]
fn test_all_folds_failing_marks_failed() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default();
    // horizon longer than any train window
    let config = common::resolve(&["label.T=400"]);
    let runner = ExperimentRunner::new(temp_dir.path(), &catalog).unwrap();

    let err = runner
        .run_with_data(&config, &common::synthetic_data(ROWS))
        .unwrap_err();
    assert!(matches!(err, Error::Aggregation(_)));

    let entries = runner.registry().list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status(), RunStatus::Failed);
    assert!(entries[0].error().unwrap().contains("Aggregation error"));

    let status: Value = serde_json::from_str(
        &std::fs::read_to_string(entries[0].workspace_path().join("status.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(status["status"], "failed");
    assert!(!entries[0].workspace_path().join("aggregate.json").exists());
}

#[test]
fn test_cancelled_run_marks_failed() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default();
    let token = CancelToken::new();
    token.cancel();
    let runner = ExperimentRunner::new(temp_dir.path(), &catalog)
        .unwrap()
        .with_cancel_token(token);

    let err = runner
        .run_with_data(&common::resolve(&[]), &common::synthetic_data(ROWS))
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(0)));

    let entries = runner.registry().list().unwrap();
    assert_eq!(entries[0].status(), RunStatus::Failed);
    assert!(entries[0].error().unwrap().contains("cancelled"));
}

/// Cancels the run while the first fold is being built
struct CancelOnBuild(CancelToken);

impl ModelBuilder for CancelOnBuild {
    fn validate(&self, _params: &Params) -> Result<()> {
        Ok(())
    }

    fn build(&self, _params: &Params, _seed: u64) -> Result<Box<dyn Model>> {
        self.0.cancel();
        Ok(Box::<MajorityClassifier>::default())
    }
}

/// Fails the fold whose derived seed matches
struct FailOnSeed(u64);

impl ModelBuilder for FailOnSeed {
    fn validate(&self, _params: &Params) -> Result<()> {
        Ok(())
    }

    fn build(&self, _params: &Params, seed: u64) -> Result<Box<dyn Model>> {
        if seed == self.0 {
            return Err(Error::Strategy(format!("model refused seed {seed}")));
        }
        Ok(Box::<MajorityClassifier>::default())
    }
}

fn resolve_with(catalog: &StrategyCatalog, model_type: &str) -> reversal_lab::config::RunConfig {
    ConfigResolver::new(catalog)
        .resolve(
            &common::base_tree(),
            &Value::Null,
            &[format!("model.type={model_type}").as_str()],
        )
        .unwrap()
}

fn persisted_folds(workspace: &std::path::Path) -> Vec<bool> {
    (0..5)
        .map(|i| workspace.join(format!("folds/fold_{i:03}.json")).is_file())
        .collect()
}

#[test]
fn test_cancel_after_first_fold_keeps_it() {
    let temp_dir = TempDir::new().unwrap();
    let token = CancelToken::new();
    let catalog = StrategyCatalog::default().with_model("cancel", CancelOnBuild(token.clone()));
    let config = resolve_with(&catalog, "cancel");
    let runner = ExperimentRunner::new(temp_dir.path(), &catalog)
        .unwrap()
        .with_cancel_token(token);

    let err = runner
        .run_with_data(&config, &common::synthetic_data(ROWS))
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(1)));

    let entry = &runner.registry().list().unwrap()[0];
    assert_eq!(entry.status(), RunStatus::Failed);
    assert_eq!(
        persisted_folds(entry.workspace_path()),
        vec![true, false, false, false, false]
    );

    let fold: FoldOutcome = serde_json::from_str(
        &std::fs::read_to_string(entry.workspace_path().join("folds/fold_000.json")).unwrap(),
    )
    .unwrap();
    assert!(fold.result().is_some());
    assert!(!entry.workspace_path().join("aggregate.json").exists());
}

#[test]
fn test_fatal_fold_keeps_earlier_folds() {
    let temp_dir = TempDir::new().unwrap();
    // seed 42, fold 2
    let catalog = StrategyCatalog::default().with_model("flaky", FailOnSeed(42 ^ 2));
    let config = resolve_with(&catalog, "flaky");
    let runner = ExperimentRunner::new(temp_dir.path(), &catalog).unwrap();

    let err = runner
        .run_with_data(&config, &common::synthetic_data(ROWS))
        .unwrap_err();
    assert!(matches!(err, Error::Strategy(_)));

    let entry = &runner.registry().list().unwrap()[0];
    assert_eq!(entry.status(), RunStatus::Failed);
    assert_eq!(
        persisted_folds(entry.workspace_path()),
        vec![true, true, false, false, false]
    );
}

#[cfg(feature = "parallel")]
#[test]
fn test_parallel_fatal_fold_keeps_finished_folds() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default().with_model("flaky", FailOnSeed(42 ^ 2));
    let config = resolve_with(&catalog, "flaky");
    let runner = ExperimentRunner::new(temp_dir.path(), &catalog)
        .unwrap()
        .with_options(RunnerOptions {
            parallel_folds: true,
        });

    let err = runner
        .run_with_data(&config, &common::synthetic_data(ROWS))
        .unwrap_err();
    assert!(matches!(err, Error::Strategy(_)));

    let entry = &runner.registry().list().unwrap()[0];
    assert_eq!(
        persisted_folds(entry.workspace_path()),
        vec![true, true, false, true, true]
    );
}

#[test]
fn test_init_train_beyond_data_fails() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default();
    let runner = ExperimentRunner::new(temp_dir.path(), &catalog).unwrap();

    let err = runner
        .run_with_data(&common::resolve(&[]), &common::synthetic_data(100))
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(runner.registry().list().unwrap()[0].status(), RunStatus::Failed);
}

#[test]
fn test_registry_queries_across_runs() {
    let temp_dir = TempDir::new().unwrap();
    let catalog = StrategyCatalog::default();
    let data = common::synthetic_data(ROWS);
    let runner = ExperimentRunner::new(temp_dir.path(), &catalog).unwrap();

    runner.run_with_data(&common::resolve(&[]), &data).unwrap();
    runner
        .run_with_data(&common::resolve(&["experiment.tags=[\"sweep\"]"]), &data)
        .unwrap();
    runner
        .run_with_data(&common::resolve(&["label.T=400"]), &data)
        .unwrap_err();

    let registry = runner.registry();
    let completed = registry
        .query(&reversal_lab::experiment::RegistryFilter::new().status(RunStatus::Completed))
        .unwrap();
    assert_eq!(completed.len(), 2);

    let sweep = registry
        .query(&reversal_lab::experiment::RegistryFilter::new().tag("sweep"))
        .unwrap();
    assert_eq!(sweep.len(), 1);

    let best = registry.best_by("accuracy", true).unwrap().unwrap();
    assert_eq!(best.status(), RunStatus::Completed);

    let removed = registry.cleanup_failed(true).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(registry.list().unwrap().len(), 2);
}
