//! Experiment tracking: identity, workspaces, artifacts, registry, runner
//!
//! ## Schema Overview
//!
//! ```text
//! Registry (1) ──< RegistryEntry (N)        <root>/registry.json
//!                      │
//!                      └── workspace        <root>/<category>/<experiment_id>/
//!                              └──< ArtifactRecord (N) [CAS, append-only]
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reversal_lab::config::ConfigResolver;
//! use reversal_lab::experiment::{ExperimentRunner, RegistryFilter};
//! use reversal_lab::strategy::StrategyCatalog;
//! use std::path::Path;
//!
//! # fn main() -> reversal_lab::Result<()> {
//! let catalog = StrategyCatalog::default();
//! let config = ConfigResolver::new(&catalog).resolve_files(
//!     Path::new("configs/base.toml"),
//!     Some(Path::new("configs/t21.toml")),
//!     &["seed=7"],
//! )?;
//!
//! let runner = ExperimentRunner::new("experiments", &catalog)?;
//! let outcome = runner.run(&config)?;
//! println!("{}: {:?}", outcome.experiment_id, outcome.aggregate.summary_metrics());
//!
//! let sweeps = runner.registry().query(&RegistryFilter::new().tag("sweep"))?;
//! # let _ = sweeps;
//! # Ok(())
//! # }
//! ```

mod artifact_record;
mod artifacts;
mod entry;
mod identity;
mod registry;
mod runner;

pub use artifact_record::ArtifactRecord;
pub use artifacts::{ArtifactStore, ARTIFACT_LOG};
pub use entry::{RegistryEntry, RegistryEntryBuilder, RunStatus};
pub use identity::{slug, CodeRevision, RunIdentity, MAX_WORKSPACE_ATTEMPTS};
pub use registry::{Registry, RegistryFilter, REGISTRY_FILE};
pub use runner::{CancelToken, ExperimentRunner, RunOutcome, RunnerOptions};
