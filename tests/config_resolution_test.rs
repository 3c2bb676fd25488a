//! Config files → overlay → overrides → hashed RunConfig

mod common;

use std::fs;

use reversal_lab::config::{ConfigResolver, MissingPolicy};
use reversal_lab::strategy::StrategyCatalog;
use reversal_lab::Error;
use serde_json::{json, Value};
use tempfile::TempDir;

const BASE_TOML: &str = r#"
seed = 42

[experiment]
name = "Reversal Baseline"
category = "tests"
tags = ["baseline", "ci"]

[data]

[features]
sets = ["returns", "volatility", "range"]
missing = "ffill_then_drop"

[label]
strategy = "reversal"
T = 5
X = 0.04

[model]
type = "centroid"

[model.params]
feature_fraction = 0.7

[evaluation]
init_train = 150
oos_window = 30
step = 30
metrics = ["accuracy", "f1_macro", "cohen_kappa"]
"#;

fn write_base(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("base.toml");
    fs::write(&path, BASE_TOML).unwrap();
    path
}

#[test]
fn test_toml_matches_json_tree() {
    let temp_dir = TempDir::new().unwrap();
    let base = write_base(&temp_dir);
    let catalog = StrategyCatalog::default();

    let from_file = ConfigResolver::new(&catalog)
        .resolve_files(&base, None, &[] as &[&str])
        .unwrap();
    let from_tree = common::resolve(&[]);
    assert_eq!(from_file.hash(), from_tree.hash());
}

#[test]
fn test_json_overlay_and_overrides() {
    let temp_dir = TempDir::new().unwrap();
    let base = write_base(&temp_dir);
    let overlay = temp_dir.path().join("t21.json");
    fs::write(
        &overlay,
        serde_json::to_string(&json!({
            "experiment": {"name": "T21"},
            "label": {"T": 21},
            "features": {"sets": ["returns"], "missing": "drop"}
        }))
        .unwrap(),
    )
    .unwrap();

    let catalog = StrategyCatalog::default();
    let config = ConfigResolver::new(&catalog)
        .resolve_files(&base, Some(&overlay), &["label.X=0.1", "seed=7"])
        .unwrap();

    assert_eq!(config.experiment().name, "T21");
    // overlay mapping merges, untouched keys survive
    assert_eq!(config.experiment().category, "tests");
    assert_eq!(config.label().params["T"], json!(21));
    assert_eq!(config.label().params["X"], json!(0.1));
    // overlay sequence replaces
    assert_eq!(config.features().sets, vec!["returns".to_string()]);
    assert_eq!(config.features().missing, MissingPolicy::Drop);
    assert_eq!(config.seed(), 7);
    assert_eq!(config.evaluation().init_train, 150);
}

#[test]
fn test_later_override_wins() {
    let config = common::resolve(&["label.T=9", "label.T=11"]);
    assert_eq!(config.label().params["T"], json!(11));
}

#[test]
fn test_override_type_mismatch_rejected() {
    let catalog = StrategyCatalog::default();
    let resolver = ConfigResolver::new(&catalog);
    for bad in ["seed=many", "evaluation.init_train=1.5", "label.X=high"] {
        let err = resolver
            .resolve(&common::base_tree(), &Value::Null, &[bad])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{bad}");
    }
}

#[test]
fn test_override_unknown_path_rejected() {
    let catalog = StrategyCatalog::default();
    let err = ConfigResolver::new(&catalog)
        .resolve(&common::base_tree(), &Value::Null, &["model.depth=3"])
        .unwrap_err();
    assert!(err.to_string().contains("model.depth"));
}

#[test]
fn test_validation_errors() {
    let catalog = StrategyCatalog::default();
    let resolver = ConfigResolver::new(&catalog);
    for bad in [
        "model.type=forest",
        "label.strategy=momentum",
        "evaluation.step=0",
        "evaluation.metrics=[\"auc\"]",
        "evaluation.metrics=[]",
        "model.params.feature_fraction=1.5",
    ] {
        let err = resolver
            .resolve(&common::base_tree(), &Value::Null, &[bad])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{bad}: {err}");
    }
}

#[test]
fn test_unknown_feature_set_lists_available() {
    let mut tree = common::base_tree();
    tree["features"]["sets"] = json!(["returns", "orderbook"]);
    let catalog = StrategyCatalog::default();
    let err = ConfigResolver::new(&catalog)
        .resolve(&tree, &Value::Null, &[] as &[&str])
        .unwrap_err()
        .to_string();
    assert!(err.contains("orderbook"));
    assert!(err.contains("returns"));
}

#[test]
fn test_with_overrides_leaves_original() {
    let catalog = StrategyCatalog::default();
    let base = common::resolve(&[]);
    let derived = base.with_overrides(&["label.T=21"], &catalog).unwrap();
    assert_eq!(base.label().params["T"], json!(5));
    assert_eq!(derived.label().params["T"], json!(21));
    assert_ne!(base.hash(), derived.hash());
    assert_eq!(
        derived.with_overrides(&["label.T=5"], &catalog).unwrap().hash(),
        base.hash()
    );
}

#[test]
fn test_hash_is_hex_sha256() {
    let config = common::resolve(&[]);
    assert_eq!(config.hash().len(), 64);
    assert!(config.hash().chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(config.hash(), common::resolve(&[]).hash());
}

#[test]
fn test_shipped_configs_resolve() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("configs");
    let catalog = StrategyCatalog::default();
    let resolver = ConfigResolver::new(&catalog);

    let base = resolver
        .resolve_files(&dir.join("base.toml"), None, &[] as &[&str])
        .unwrap();
    let t21 = resolver
        .resolve_files(&dir.join("base.toml"), Some(&dir.join("t21.toml")), &[] as &[&str])
        .unwrap();

    assert_eq!(base.label().params["T"], json!(14));
    assert_eq!(t21.label().params["T"], json!(21));
    assert_eq!(t21.experiment().category, "labels");
    assert_eq!(t21.experiment().tags, vec!["sweep".to_string(), "horizon".to_string()]);
    assert_ne!(base.hash(), t21.hash());
}
