use anyhow::Result;

use crate::math::Array2;

/// Contract shared by the regressors used for training and retraining.
/// Implementations must be deterministic for a fixed configuration seed.
pub trait Regressor: Send + Sync {
    /// Fit the model. `sample_weight`, when given, has one positive weight per row.
    fn fit(&mut self, x: &Array2<f32>, y: &[f32], sample_weight: Option<&[f32]>) -> Result<()>;

    /// Predict raw (unclamped) scores.
    fn predict(&self, x: &Array2<f32>) -> Vec<f32>;

    /// Predict using only the first `n_rounds` boosting rounds.
    fn predict_rounds(&self, x: &Array2<f32>, n_rounds: usize) -> Vec<f32>;

    fn num_rounds(&self) -> usize;

    /// Normalised per-feature importances, aligned with the training columns.
    fn feature_importances(&self) -> Vec<f64>;

    /// Optional human readable name for the model
    fn name(&self) -> &str {
        "regressor"
    }
}
