//! Built-in reversal label

use super::{param_f64, param_usize, Label, LabelStrategy, Params};
use crate::storage::Bar;
use crate::{Error, Result};
use tracing::debug;

/// Top reversal: price drops by at least `X` within `T` bars
pub const TOP_REVERSAL: Label = 0;
/// Neither threshold reached
pub const NORMAL: Label = 1;
/// Bottom reversal: price rises by at least `X` within `T` bars
pub const BOTTOM_REVERSAL: Label = 2;

const DEFAULT_HORIZON: usize = 14;
const DEFAULT_THRESHOLD: f64 = 0.08;

/// Three-class reversal label over a forward window.
///
/// Parameters: `T` (horizon in bars, default 14) and `X` (relative move,
/// default 0.08). When both thresholds are hit inside one window the bottom
/// reversal wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reversal;

impl Reversal {
    fn params(params: &Params) -> Result<(usize, f64)> {
        let horizon = param_usize(params, "T", DEFAULT_HORIZON)?;
        let threshold = param_f64(params, "X", DEFAULT_THRESHOLD)?;
        if horizon == 0 {
            return Err(Error::Config("label parameter T must be at least 1".to_string()));
        }
        if !(threshold > 0.0 && threshold.is_finite()) {
            return Err(Error::Config(format!(
                "label parameter X must be a positive number, got {threshold}"
            )));
        }
        Ok((horizon, threshold))
    }
}

impl LabelStrategy for Reversal {
    fn horizon(&self, params: &Params) -> Result<usize> {
        Self::params(params).map(|(horizon, _)| horizon)
    }

    fn compute(&self, bars: &[Bar], params: &Params) -> Result<Vec<Option<Label>>> {
        let (horizon, threshold) = Self::params(params)?;
        let mut labels = vec![None; bars.len()];
        let mut counts = [0usize; 3];

        for t in 0..bars.len().saturating_sub(horizon) {
            let base = bars[t].close;
            let future = &bars[t + 1..=t + horizon];
            let max_close = future.iter().map(|b| b.close).fold(f64::NEG_INFINITY, f64::max);
            let min_close = future.iter().map(|b| b.close).fold(f64::INFINITY, f64::min);

            let mut label = NORMAL;
            if min_close / base - 1.0 <= -threshold {
                label = TOP_REVERSAL;
            }
            if max_close / base - 1.0 >= threshold {
                label = BOTTOM_REVERSAL;
            }
            #[allow(clippy::cast_sign_loss)]
            {
                counts[label as usize] += 1;
            }
            labels[t] = Some(label);
        }

        debug!(
            horizon,
            threshold,
            top = counts[0],
            normal = counts[1],
            bottom = counts[2],
            "reversal labels computed"
        );
        Ok(labels)
    }
}
