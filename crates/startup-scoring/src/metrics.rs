//! Regression metrics used for cross-validation and the retraining guard.
use serde::{Deserialize, Serialize};

/// MAE, RMSE and R² of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    /// Evaluate predictions against the truth. Both slices must have the same length.
    pub fn evaluate(y_true: &[f32], y_pred: &[f32]) -> Self {
        Self {
            mae: mae(y_true, y_pred),
            rmse: rmse(y_true, y_pred),
            r2: r2(y_true, y_pred),
        }
    }

    pub fn rounded(&self) -> Self {
        Self {
            mae: round4(self.mae),
            rmse: round4(self.rmse),
            r2: round4(self.r2),
        }
    }
}

/// Per-fold metrics plus their averages, as stored in artifact metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvMetrics {
    pub n_folds: usize,
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
    pub folds: Vec<RegressionMetrics>,
}

impl CvMetrics {
    /// Average fold metrics (in fold order). Values are rounded to four decimals.
    pub fn from_folds(folds: Vec<RegressionMetrics>) -> Self {
        let n = folds.len().max(1) as f64;
        let mae = folds.iter().map(|m| m.mae).sum::<f64>() / n;
        let rmse = folds.iter().map(|m| m.rmse).sum::<f64>() / n;
        let r2 = folds.iter().map(|m| m.r2).sum::<f64>() / n;
        Self {
            n_folds: folds.len(),
            mae: round4(mae),
            rmse: round4(rmse),
            r2: round4(r2),
            folds: folds.iter().map(RegressionMetrics::rounded).collect(),
        }
    }

    pub fn summary(&self) -> RegressionMetrics {
        RegressionMetrics {
            mae: self.mae,
            rmse: self.rmse,
            r2: self.r2,
        }
    }
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

pub fn mae(y_true: &[f32], y_pred: &[f32]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let total: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(&t, &p)| (t as f64 - p as f64).abs())
        .sum();
    total / y_true.len() as f64
}

pub fn rmse(y_true: &[f32], y_pred: &[f32]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let total: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(&t, &p)| (t as f64 - p as f64).powi(2))
        .sum();
    (total / y_true.len() as f64).sqrt()
}

/// Coefficient of determination. A constant truth gives 1.0 for a perfect fit
/// and 0.0 otherwise.
pub fn r2(y_true: &[f32], y_pred: &[f32]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mean = y_true.iter().map(|&t| t as f64).sum::<f64>() / y_true.len() as f64;
    let ss_tot: f64 = y_true.iter().map(|&t| (t as f64 - mean).powi(2)).sum();
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(&t, &p)| (t as f64 - p as f64).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_prediction() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let m = RegressionMetrics::evaluate(&y, &y);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.rmse, 0.0);
        assert_eq!(m.r2, 1.0);
    }

    #[test]
    fn mean_prediction_has_zero_r2() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let p = [2.5; 4];
        assert!(r2(&y, &p).abs() < 1e-12);
        assert!((mae(&y, &p) - 1.0).abs() < 1e-12);
        assert!((rmse(&y, &p) - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn cv_metrics_average_in_fold_order() {
        let folds = vec![
            RegressionMetrics { mae: 1.0, rmse: 2.0, r2: 0.5 },
            RegressionMetrics { mae: 3.0, rmse: 4.0, r2: 0.7 },
        ];
        let cv = CvMetrics::from_folds(folds);
        assert_eq!(cv.n_folds, 2);
        assert_eq!(cv.mae, 2.0);
        assert_eq!(cv.rmse, 3.0);
        assert_eq!(cv.r2, 0.6);
        assert_eq!(cv.folds[1].mae, 3.0);
    }
}
