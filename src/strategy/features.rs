//! Built-in trailing-window feature sets

use super::FeatureSet;
use crate::storage::Bar;

const RETURN_LAGS: [usize; 3] = [1, 5, 10];
const VOLATILITY_WINDOWS: [usize; 2] = [10, 20];
const CLOSE_POSITION_WINDOW: usize = 14;

/// Simple close-to-close returns over several lags
#[derive(Debug, Clone, Copy, Default)]
pub struct Returns;

impl FeatureSet for Returns {
    fn columns(&self) -> Vec<String> {
        RETURN_LAGS.iter().map(|lag| format!("ret_{lag}")).collect()
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Vec<f64>> {
        RETURN_LAGS
            .iter()
            .map(|&lag| {
                (0..bars.len())
                    .map(|t| {
                        if t < lag {
                            f64::NAN
                        } else {
                            bars[t].close / bars[t - lag].close - 1.0
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

/// Rolling standard deviation of one-bar returns
#[derive(Debug, Clone, Copy, Default)]
pub struct Volatility;

impl FeatureSet for Volatility {
    fn columns(&self) -> Vec<String> {
        VOLATILITY_WINDOWS
            .iter()
            .map(|w| format!("vol_{w}"))
            .collect()
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Vec<f64>> {
        let returns: Vec<f64> = (0..bars.len())
            .map(|t| {
                if t == 0 {
                    f64::NAN
                } else {
                    bars[t].close / bars[t - 1].close - 1.0
                }
            })
            .collect();

        VOLATILITY_WINDOWS
            .iter()
            .map(|&window| {
                (0..bars.len())
                    .map(|t| {
                        // returns[0] is undefined, so the first full window ends at `window`
                        if t < window {
                            return f64::NAN;
                        }
                        population_std(&returns[t + 1 - window..=t])
                    })
                    .collect()
            })
            .collect()
    }
}

/// Intrabar range and position of the close inside the recent range
#[derive(Debug, Clone, Copy, Default)]
pub struct Range;

impl FeatureSet for Range {
    fn columns(&self) -> Vec<String> {
        vec![
            "range_pct".to_string(),
            format!("close_pos_{CLOSE_POSITION_WINDOW}"),
        ]
    }

    fn compute(&self, bars: &[Bar]) -> Vec<Vec<f64>> {
        let range_pct = bars
            .iter()
            .map(|b| (b.high - b.low) / b.close)
            .collect();

        let close_pos = (0..bars.len())
            .map(|t| {
                if t + 1 < CLOSE_POSITION_WINDOW {
                    return f64::NAN;
                }
                let window = &bars[t + 1 - CLOSE_POSITION_WINDOW..=t];
                let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
                let high = window
                    .iter()
                    .map(|b| b.high)
                    .fold(f64::NEG_INFINITY, f64::max);
                let span = high - low;
                if span > 0.0 {
                    (bars[t].close - low) / span
                } else {
                    0.5
                }
            })
            .collect();

        vec![range_pct, close_pos]
    }
}

#[allow(clippy::cast_precision_loss)]
fn population_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}
