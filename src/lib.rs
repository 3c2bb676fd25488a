//! # reversal-lab: Walk-Forward Experiment Engine
//!
//! **Version**: 0.1.0
//!
//! reversal-lab runs reproducible, comparable machine-learning experiments
//! that classify price-reversal events in historical market data. Every run is
//! resolved from a declarative config, executed in an isolated workspace and
//! evaluated with an expanding-window walk-forward protocol that never lets a
//! model see rows at or after the ones it is scored on.
//!
//! ## Components
//!
//! - [`config`]: base + overlay + overrides → immutable, hashed [`config::RunConfig`]
//! - [`evaluation`]: fold splitting, per-fold execution, aggregation, metrics
//! - [`experiment`]: experiment ids, workspaces, artifacts, registry, runner
//! - [`strategy`]: pluggable feature/label/model collaborators
//! - [`storage`]: OHLCV market data from CSV or Parquet
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use reversal_lab::config::ConfigResolver;
//! use reversal_lab::experiment::ExperimentRunner;
//! use reversal_lab::strategy::StrategyCatalog;
//! use std::path::Path;
//!
//! let catalog = StrategyCatalog::default();
//! let config = ConfigResolver::new(&catalog)
//!     .resolve_files(Path::new("configs/base.toml"), None, &["label.T=21"])?;
//!
//! let outcome = ExperimentRunner::new("experiments", &catalog)?.run(&config)?;
//! for (metric, stats) in &outcome.aggregate.per_metric_stats {
//!     println!("{metric}: {:.4} ± {:.4}", stats.mean, stats.std);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod evaluation;
pub mod experiment;
pub mod storage;
pub mod strategy;

pub use error::{Error, Result};
