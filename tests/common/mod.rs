//! Shared fixtures for integration tests

#![allow(dead_code)]

use reversal_lab::config::{ConfigResolver, RunConfig};
use reversal_lab::storage::{Bar, MarketData};
use reversal_lab::strategy::StrategyCatalog;
use serde_json::{json, Value};

/// Oscillating price series with enough swings to produce every reversal class
pub fn synthetic_bars(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let t = f64::from(u32::try_from(i).unwrap());
            let close = 100.0 * (1.0 + 0.12 * (t / 9.0).sin() + 0.04 * (t / 3.7).cos());
            Bar {
                ts: 1_700_000_000 + i64::from(u32::try_from(i).unwrap()) * 3600,
                open: close * 0.998,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1000.0 + t,
            }
        })
        .collect()
}

pub fn synthetic_data(n: usize) -> MarketData {
    MarketData::new(synthetic_bars(n))
}

/// Write the synthetic series as CSV
pub fn write_csv(path: &std::path::Path, n: usize) {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for b in synthetic_bars(n) {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.ts, b.open, b.high, b.low, b.close, b.volume
        ));
    }
    std::fs::write(path, out).unwrap();
}

pub fn base_tree() -> Value {
    json!({
        "experiment": {"name": "Reversal Baseline", "category": "tests", "tags": ["baseline", "ci"]},
        "data": {"path": null},
        "features": {"sets": ["returns", "volatility", "range"], "missing": "ffill_then_drop"},
        "label": {"strategy": "reversal", "T": 5, "X": 0.04},
        "model": {"type": "centroid", "params": {"feature_fraction": 0.7}},
        "evaluation": {"init_train": 150, "oos_window": 30, "step": 30,
                       "metrics": ["accuracy", "f1_macro", "cohen_kappa"]},
        "seed": 42
    })
}

pub fn resolve(overrides: &[&str]) -> RunConfig {
    ConfigResolver::new(&StrategyCatalog::default())
        .resolve(&base_tree(), &Value::Null, overrides)
        .unwrap()
}
