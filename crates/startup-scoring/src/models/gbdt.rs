use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{ModelConfig, ModelType};
use crate::error::ScoringError;
use crate::math::Array2;
use crate::models::quantize::BinCuts;
use crate::models::regressor::Regressor;
use crate::models::tree::{Tree, TreeGrower, TreeParams};

/// Gradient Boosting Decision Tree (GBDT) regressor with squared loss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtRegressor {
    params: ModelConfig,
    base_score: f64,
    n_features: usize,
    trees: Vec<Tree>,
    /// Total split gain per feature over all trees.
    feature_gain: Vec<f64>,
}

impl GbdtRegressor {
    pub fn new(params: ModelConfig) -> Self {
        GbdtRegressor {
            params,
            base_score: 0.0,
            n_features: 0,
            trees: Vec::new(),
            feature_gain: Vec::new(),
        }
    }

    pub fn params(&self) -> &ModelConfig {
        &self.params
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn is_fitted(&self) -> bool {
        self.n_features > 0
    }

    /// Fit on `x`/`y`, optionally weighting each row. Refitting discards previous trees.
    pub fn fit_weighted(&mut self, x: &Array2<f32>, y: &[f32], weights: Option<&[f32]>) -> Result<()> {
        if x.is_empty() {
            return Err(ScoringError::EmptyDataset.into());
        }
        if y.len() != x.nrows() {
            return Err(ScoringError::ShapeMismatch {
                expected: x.nrows(),
                found: y.len(),
            }
            .into());
        }
        if let Some(w) = weights {
            if w.len() != x.nrows() {
                return Err(ScoringError::ShapeMismatch {
                    expected: x.nrows(),
                    found: w.len(),
                }
                .into());
            }
            if w.iter().any(|&v| !(v > 0.0) || !v.is_finite()) {
                return Err(anyhow!("Sample weights must be positive and finite"));
            }
        }

        let ModelType::GBDT {
            n_estimators,
            max_depth,
            subsample,
            colsample_bytree,
            reg_alpha,
            reg_lambda,
            min_child_weight,
            max_bins,
            seed,
        } = self.params.model_type.clone();

        let n_rows = x.nrows();
        let n_features = x.ncols();
        let weight = |i: usize| weights.map_or(1.0, |w| w[i] as f64);

        let total_weight: f64 = (0..n_rows).map(weight).sum();
        let base_score = (0..n_rows).map(|i| weight(i) * y[i] as f64).sum::<f64>() / total_weight;

        let cuts = BinCuts::from_matrix(x, max_bins);
        let bins = cuts.quantize(x);
        let tree_params = TreeParams {
            max_depth,
            learning_rate: self.params.learning_rate as f64,
            reg_lambda,
            reg_alpha,
            min_child_weight,
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut preds = vec![base_score; n_rows];
        let mut grad = vec![0.0; n_rows];
        let hess: Vec<f64> = (0..n_rows).map(weight).collect();
        let mut trees = Vec::with_capacity(n_estimators);
        let mut feature_gain = vec![0.0; n_features];
        let n_cols = ((n_features as f64 * colsample_bytree as f64).round() as usize).clamp(1, n_features);

        for round in 0..n_estimators {
            for i in 0..n_rows {
                grad[i] = hess[i] * (preds[i] - y[i] as f64);
            }

            let mut rows: Vec<usize> = if subsample < 1.0 {
                (0..n_rows)
                    .filter(|_| rng.gen::<f32>() < subsample)
                    .collect()
            } else {
                (0..n_rows).collect()
            };
            if rows.is_empty() {
                rows = (0..n_rows).collect();
            }
            let mut features = index::sample(&mut rng, n_features, n_cols).into_vec();
            features.sort_unstable();

            let grower = TreeGrower {
                cuts: &cuts,
                bins: &bins,
                grad: &grad,
                hess: &hess,
                features: &features,
                params: tree_params,
            };
            let tree = grower.grow(rows, &mut feature_gain);
            for (i, row) in x.rows().enumerate() {
                preds[i] += tree.predict(row);
            }
            log::trace!("Boosting round {} grew {} nodes", round, tree.nodes.len());
            trees.push(tree);
        }

        self.base_score = base_score;
        self.n_features = n_features;
        self.trees = trees;
        self.feature_gain = feature_gain;
        log::debug!(
            "Fitted GBDT with {} trees on {} rows x {} features",
            self.trees.len(),
            n_rows,
            n_features
        );
        Ok(())
    }

    /// Raw (unclamped) prediction for one row.
    pub fn predict_row(&self, row: &[f32]) -> f64 {
        self.predict_row_rounds(row, self.trees.len())
    }

    /// Prediction using only the first `n_rounds` boosting rounds.
    pub fn predict_row_rounds(&self, row: &[f32], n_rounds: usize) -> f64 {
        self.base_score
            + self
                .trees
                .iter()
                .take(n_rounds)
                .map(|tree| tree.predict(row))
                .sum::<f64>()
    }

    /// `out[k]` is the prediction after the first `k` rounds, for `k` in `0..=n_rounds`.
    pub fn staged_predictions(&self, row: &[f32]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.trees.len() + 1);
        let mut acc = self.base_score;
        out.push(acc);
        for tree in &self.trees {
            acc += tree.predict(row);
            out.push(acc);
        }
        out
    }

    /// Normalised gain importance per feature; all zeros for a model without splits.
    pub fn gain_importances(&self) -> Vec<f64> {
        let total: f64 = self.feature_gain.iter().sum();
        if total <= 0.0 {
            return vec![0.0; self.feature_gain.len()];
        }
        self.feature_gain.iter().map(|g| g / total).collect()
    }
}

impl Regressor for GbdtRegressor {
    fn fit(&mut self, x: &Array2<f32>, y: &[f32], sample_weight: Option<&[f32]>) -> Result<()> {
        self.fit_weighted(x, y, sample_weight)
    }

    fn predict(&self, x: &Array2<f32>) -> Vec<f32> {
        x.rows().map(|row| self.predict_row(row) as f32).collect()
    }

    fn predict_rounds(&self, x: &Array2<f32>, n_rounds: usize) -> Vec<f32> {
        x.rows()
            .map(|row| self.predict_row_rounds(row, n_rounds) as f32)
            .collect()
    }

    fn num_rounds(&self) -> usize {
        self.trees.len()
    }

    fn feature_importances(&self) -> Vec<f64> {
        self.gain_importances()
    }

    fn name(&self) -> &str {
        self.params.model_type.engine_name()
    }
}
