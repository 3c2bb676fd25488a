//! Error types for reversal-lab
//!
//! One taxonomy for the whole run: configuration and workspace problems abort
//! before computation, per-fold data problems are recorded and skipped,
//! everything else marks the run failed.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// reversal-lab error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or incomplete run specification
    #[error("Config error: {0}")]
    Config(String),

    /// Experiment workspace could not be created
    #[error("Workspace error: {0}\nRetry the run or remove the stale workspace directory")]
    Workspace(String),

    /// A single fold cannot produce usable train/test data
    #[error("Insufficient data in fold {fold_id}: {reason}")]
    InsufficientData {
        /// Fold that failed
        fold_id: usize,
        /// Why no usable rows remained
        reason: String,
    },

    /// No fold succeeded, nothing to aggregate
    #[error("Aggregation error: {0}")]
    Aggregation(String),

    /// Registry index corruption or missing entry
    #[error("Registry error: {0}")]
    Registry(String),

    /// Feature/label/model collaborator broke its contract
    #[error("Strategy error: {0}")]
    Strategy(String),

    /// Raw market data could not be loaded or validated
    #[error("Data error: {0}")]
    Data(String),

    /// Artifact write rejected (append-only store)
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Run aborted at a fold boundary
    #[error("Run cancelled before fold {0}")]
    Cancelled(usize),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl Error {
    /// Whether this error only invalidates one fold rather than the run.
    #[must_use]
    pub const fn is_fold_local(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }
}
