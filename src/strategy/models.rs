//! Built-in classifiers
//!
//! - `centroid`: nearest class centroid on standardized features, fitted on a
//!   seeded random feature subspace (`feature_fraction`, default 1.0)
//! - `majority`: predicts the most frequent training label

use super::{param_f64, Label, Model, ModelBuilder, Params};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use std::collections::BTreeMap;

/// Builder for [`CentroidClassifier`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CentroidBuilder;

impl CentroidBuilder {
    fn feature_fraction(params: &Params) -> Result<f64> {
        let fraction = param_f64(params, "feature_fraction", 1.0)?;
        if fraction > 0.0 && fraction <= 1.0 {
            Ok(fraction)
        } else {
            Err(Error::Config(format!(
                "model parameter feature_fraction must be in (0, 1], got {fraction}"
            )))
        }
    }
}

impl ModelBuilder for CentroidBuilder {
    fn validate(&self, params: &Params) -> Result<()> {
        Self::feature_fraction(params).map(|_| ())
    }

    fn build(&self, params: &Params, seed: u64) -> Result<Box<dyn Model>> {
        Ok(Box::new(CentroidClassifier::new(
            Self::feature_fraction(params)?,
            seed,
        )))
    }
}

/// Nearest-centroid classifier over a seeded feature subspace
#[derive(Debug, Clone)]
pub struct CentroidClassifier {
    feature_fraction: f64,
    seed: u64,
    fitted: Option<CentroidState>,
}

#[derive(Debug, Clone)]
struct CentroidState {
    n_features: usize,
    selected: Vec<usize>,
    mean: Vec<f64>,
    scale: Vec<f64>,
    centroids: BTreeMap<Label, Vec<f64>>,
    importances: Vec<f64>,
}

impl CentroidClassifier {
    /// Unfitted classifier
    #[must_use]
    pub const fn new(feature_fraction: f64, seed: u64) -> Self {
        Self {
            feature_fraction,
            seed,
            fitted: None,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn select_features(&self, n_features: usize) -> Vec<usize> {
        if n_features == 0 {
            return Vec::new();
        }
        let amount = ((self.feature_fraction * n_features as f64).round() as usize).clamp(1, n_features);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut selected = rand::seq::index::sample(&mut rng, n_features, amount).into_vec();
        selected.sort_unstable();
        selected
    }
}

impl Model for CentroidClassifier {
    #[allow(clippy::cast_precision_loss)]
    fn fit(&mut self, features: &[Vec<f64>], labels: &[Label]) -> Result<()> {
        if features.is_empty() || features.len() != labels.len() {
            return Err(Error::Strategy(format!(
                "centroid fit needs matching non-empty inputs, got {} rows and {} labels",
                features.len(),
                labels.len()
            )));
        }
        let n_features = features[0].len();
        let selected = self.select_features(n_features);
        let n = features.len() as f64;

        let mean: Vec<f64> = selected
            .iter()
            .map(|&j| features.iter().map(|row| row[j]).sum::<f64>() / n)
            .collect();
        let scale: Vec<f64> = selected
            .iter()
            .zip(&mean)
            .map(|(&j, &m)| {
                let std = (features.iter().map(|row| (row[j] - m).powi(2)).sum::<f64>() / n).sqrt();
                if std > 0.0 {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        let mut sums: BTreeMap<Label, (Vec<f64>, usize)> = BTreeMap::new();
        for (row, &label) in features.iter().zip(labels) {
            let (sum, count) = sums
                .entry(label)
                .or_insert_with(|| (vec![0.0; selected.len()], 0));
            for (k, &j) in selected.iter().enumerate() {
                sum[k] += (row[j] - mean[k]) / scale[k];
            }
            *count += 1;
        }

        let mut importances = vec![0.0; n_features];
        let mut centroids = BTreeMap::new();
        for (label, (sum, count)) in sums {
            let weight = count as f64 / n;
            let centroid: Vec<f64> = sum.iter().map(|s| s / count as f64).collect();
            for (k, &j) in selected.iter().enumerate() {
                importances[j] += weight * centroid[k].powi(2);
            }
            centroids.insert(label, centroid);
        }

        self.fitted = Some(CentroidState {
            n_features,
            selected,
            mean,
            scale,
            centroids,
            importances,
        });
        Ok(())
    }

    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<Label>> {
        let state = self
            .fitted
            .as_ref()
            .ok_or_else(|| Error::Strategy("centroid model used before fit".to_string()))?;

        features
            .iter()
            .map(|row| {
                if row.len() != state.n_features {
                    return Err(Error::Strategy(format!(
                        "centroid model fitted on {} features, got {}",
                        state.n_features,
                        row.len()
                    )));
                }
                let mut best: Option<(Label, f64)> = None;
                for (&label, centroid) in &state.centroids {
                    let distance: f64 = state
                        .selected
                        .iter()
                        .enumerate()
                        .map(|(k, &j)| ((row[j] - state.mean[k]) / state.scale[k] - centroid[k]).powi(2))
                        .sum();
                    if best.map_or(true, |(_, d)| distance < d) {
                        best = Some((label, distance));
                    }
                }
                best.map(|(label, _)| label)
                    .ok_or_else(|| Error::Strategy("centroid model has no classes".to_string()))
            })
            .collect()
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.fitted.as_ref().map(|s| s.importances.clone())
    }

    fn snapshot(&self) -> Option<serde_json::Value> {
        self.fitted.as_ref().map(|s| {
            json!({
                "type": "centroid",
                "seed": self.seed,
                "feature_fraction": self.feature_fraction,
                "selected": s.selected,
                "mean": s.mean,
                "scale": s.scale,
                "centroids": s.centroids,
            })
        })
    }
}

/// Builder for [`MajorityClassifier`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MajorityBuilder;

impl ModelBuilder for MajorityBuilder {
    fn validate(&self, _params: &Params) -> Result<()> {
        Ok(())
    }

    fn build(&self, _params: &Params, _seed: u64) -> Result<Box<dyn Model>> {
        Ok(Box::<MajorityClassifier>::default())
    }
}

/// Baseline that always predicts the most frequent training label
#[derive(Debug, Clone, Default)]
pub struct MajorityClassifier {
    label: Option<Label>,
}

impl Model for MajorityClassifier {
    fn fit(&mut self, _features: &[Vec<f64>], labels: &[Label]) -> Result<()> {
        let mut counts: BTreeMap<Label, usize> = BTreeMap::new();
        for &label in labels {
            *counts.entry(label).or_default() += 1;
        }
        // ties resolve to the smallest label
        let mut best: Option<(Label, usize)> = None;
        for (label, count) in counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((label, count));
            }
        }
        self.label = Some(
            best.map(|(label, _)| label)
                .ok_or_else(|| Error::Strategy("majority fit on empty labels".to_string()))?,
        );
        Ok(())
    }

    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<Label>> {
        let label = self
            .label
            .ok_or_else(|| Error::Strategy("majority model used before fit".to_string()))?;
        Ok(vec![label; features.len()])
    }

    fn snapshot(&self) -> Option<serde_json::Value> {
        self.label.map(|label| json!({ "type": "majority", "label": label }))
    }
}
