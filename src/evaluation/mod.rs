//! Walk-forward evaluation
//!
//! - [`splitter`]: expanding-window fold generation
//! - [`fold`]: per-fold train/predict/score
//! - [`aggregate`]: cross-fold statistics
//! - [`metrics`]: classification metrics

pub mod aggregate;
pub mod fold;
pub mod metrics;
pub mod splitter;

pub use aggregate::{AggregateResult, Aggregator, CombinedPrediction, MetricStats};
pub use fold::{ExecutedFold, FoldExecutor, FoldOutcome, FoldResult, Prediction};
pub use splitter::{split, Fold, Folds, WindowSplitter};
