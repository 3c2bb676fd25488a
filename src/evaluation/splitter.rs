//! Expanding-window walk-forward splits
//!
//! Fold `k` trains on `[0, init_train + k * step)` and tests on the next
//! `oos_window` rows, truncated at the end of the data:
//!
//! ```text
//! n_rows = 100, init_train = 50, oos_window = 10, step = 10
//!
//! fold 0  train [0, 50)  test [50, 60)
//! fold 1  train [0, 60)  test [60, 70)
//! ...
//! fold 4  train [0, 90)  test [90, 100)
//! ```
//!
//! Test ranges always start at the end of their train range, so a fold never
//! trains on rows it is evaluated on.

use crate::config::EvaluationConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// One train/test split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    /// Position in the fold sequence, starting at 0
    pub fold_id: usize,
    /// Training rows
    pub train: Range<usize>,
    /// Out-of-sample rows, starting at `train.end`
    pub test: Range<usize>,
}

impl Fold {
    /// Number of training rows
    #[must_use]
    pub fn train_size(&self) -> usize {
        self.train.len()
    }

    /// Number of test rows
    #[must_use]
    pub fn test_size(&self) -> usize {
        self.test.len()
    }

    /// Rows touched by this fold, `[train.start, test.end)`
    #[must_use]
    pub const fn window(&self) -> Range<usize> {
        self.train.start..self.test.end
    }
}

/// Split parameters, validated on construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSplitter {
    init_train: usize,
    oos_window: usize,
    step: usize,
}

impl WindowSplitter {
    /// Create a splitter
    ///
    /// # Errors
    /// Returns error if any size is zero
    pub fn new(init_train: usize, oos_window: usize, step: usize) -> Result<Self> {
        if init_train == 0 {
            return Err(Error::Config("init_train must be positive".to_string()));
        }
        if oos_window == 0 {
            return Err(Error::Config("oos_window must be positive".to_string()));
        }
        if step == 0 {
            return Err(Error::Config("step must be positive".to_string()));
        }
        Ok(Self {
            init_train,
            oos_window,
            step,
        })
    }

    /// Splitter for an `evaluation` config section
    ///
    /// # Errors
    /// Returns error if any size is zero
    pub fn from_config(config: &EvaluationConfig) -> Result<Self> {
        Self::new(config.init_train, config.oos_window, config.step)
    }

    /// Lazily generate the folds for a dataset of `n_rows`
    ///
    /// # Errors
    /// Returns error if the initial train window does not leave any test rows
    pub fn split(&self, n_rows: usize) -> Result<Folds> {
        if self.init_train >= n_rows {
            return Err(Error::Config(format!(
                "init_train ({}) must be smaller than the number of rows ({n_rows})",
                self.init_train
            )));
        }
        Ok(Folds {
            splitter: *self,
            n_rows,
            next_id: 0,
        })
    }

    /// Number of folds `split(n_rows)` yields, 0 if it would fail
    #[must_use]
    pub fn fold_count(&self, n_rows: usize) -> usize {
        if self.init_train >= n_rows {
            return 0;
        }
        (n_rows - self.init_train).div_ceil(self.step)
    }
}

/// Convenience wrapper: validate the sizes and split in one call
///
/// # Errors
/// Returns error if any size is zero or `init_train >= n_rows`
pub fn split(n_rows: usize, init_train: usize, oos_window: usize, step: usize) -> Result<Folds> {
    WindowSplitter::new(init_train, oos_window, step)?.split(n_rows)
}

/// Iterator over the folds of one dataset
#[derive(Debug, Clone)]
pub struct Folds {
    splitter: WindowSplitter,
    n_rows: usize,
    next_id: usize,
}

impl Iterator for Folds {
    type Item = Fold;

    fn next(&mut self) -> Option<Fold> {
        let WindowSplitter {
            init_train,
            oos_window,
            step,
        } = self.splitter;
        let train_end = self
            .next_id
            .checked_mul(step)
            .and_then(|offset| offset.checked_add(init_train))?;
        if train_end >= self.n_rows {
            return None;
        }
        let test_end = train_end.saturating_add(oos_window).min(self.n_rows);
        let fold = Fold {
            fold_id: self.next_id,
            train: 0..train_end,
            test: train_end..test_end,
        };
        self.next_id += 1;
        Some(fold)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .splitter
            .fold_count(self.n_rows)
            .saturating_sub(self.next_id);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Folds {}

impl std::iter::FusedIterator for Folds {}
