//! Cross-validated training of one regressor per scoring target.
use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ModelConfig, ModelType, ScoringConfig};
use crate::dataset::GroundTruth;
use crate::error::ScoringError;
use crate::math::Array2;
use crate::metrics::{CvMetrics, RegressionMetrics};
use crate::models::{build_ensemble, build_model, GbdtRegressor, Regressor};
use crate::store::{ArtifactInfo, FeatureImportance, ModelStore};
use crate::target::Target;

pub const TRAINING_SUMMARY_FILE: &str = "training_summary.json";

/// Number of top features listed per target in the training summary.
const SUMMARY_TOP_FEATURES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub version: String,
    pub cv_metrics: RegressionMetrics,
    pub top_features: Vec<FeatureImportance>,
}

/// Written next to the per-target directories after multi-target training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub engine: String,
    pub trained_at: String,
    pub n_samples: usize,
    pub n_features: usize,
    pub targets: BTreeMap<Target, TargetSummary>,
    /// Targets whose training failed, with the error message.
    #[serde(default)]
    pub failed: BTreeMap<Target, String>,
}

#[derive(Debug, Clone)]
pub struct ModelTrainer {
    pub config: ModelConfig,
    pub n_folds: usize,
    pub top_features: usize,
}

impl ModelTrainer {
    pub fn new(config: ModelConfig, n_folds: usize) -> Self {
        Self {
            config,
            n_folds,
            top_features: 15,
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self {
            config: config.model.clone(),
            n_folds: config.n_folds,
            top_features: config.top_features,
        }
    }

    fn seed(&self) -> u64 {
        match self.config.model_type {
            ModelType::GBDT { seed, .. } => seed,
        }
    }

    /// K-fold cross-validation followed by a refit on all rows.
    ///
    /// Folds are trained in parallel and aggregated in fold order, so metrics
    /// only depend on the data and the configured seed.
    pub fn train(
        &self,
        x: &Array2<f32>,
        y: &[f32],
        weights: Option<&[f32]>,
    ) -> Result<(GbdtRegressor, CvMetrics)> {
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

        let n_folds = self.n_folds.min(x.nrows());
        let cv_metrics = if n_folds < 2 {
            log::warn!(
                "Skipping cross-validation: {} samples for {} folds",
                x.nrows(),
                self.n_folds
            );
            CvMetrics::from_folds(Vec::new())
        } else {
            let folds = kfold_indices(x.nrows(), n_folds, self.seed());
            let fold_metrics = folds
                .par_iter()
                .map(|(train_idx, test_idx)| self.run_fold(x, y, weights, train_idx, test_idx))
                .collect::<Result<Vec<_>>>()?;
            for (i, m) in fold_metrics.iter().enumerate() {
                log::info!(
                    "Fold {}/{}: MAE={:.4} RMSE={:.4} R2={:.4}",
                    i + 1,
                    n_folds,
                    m.mae,
                    m.rmse,
                    m.r2
                );
            }
            let cv = CvMetrics::from_folds(fold_metrics);
            log::info!(
                "CV mean: MAE={:.4} RMSE={:.4} R2={:.4}",
                cv.mae,
                cv.rmse,
                cv.r2
            );
            cv
        };

        let model = self.fit_full(x, y, weights)?;
        Ok((model, cv_metrics))
    }

    fn run_fold(
        &self,
        x: &Array2<f32>,
        y: &[f32],
        weights: Option<&[f32]>,
        train_idx: &[usize],
        test_idx: &[usize],
    ) -> Result<RegressionMetrics> {
        let x_train = x.select_rows(train_idx);
        let y_train: Vec<f32> = train_idx.iter().map(|&i| y[i]).collect();
        let w_train: Option<Vec<f32>> = weights.map(|w| train_idx.iter().map(|&i| w[i]).collect());
        let x_test = x.select_rows(test_idx);
        let y_test: Vec<f32> = test_idx.iter().map(|&i| y[i]).collect();

        let mut model = build_model(self.config.clone());
        model.fit(&x_train, &y_train, w_train.as_deref())?;
        Ok(evaluate(model.as_ref(), &x_test, &y_test))
    }

    /// Fit one model on every row, no held-out data.
    pub fn fit_full(&self, x: &Array2<f32>, y: &[f32], weights: Option<&[f32]>) -> Result<GbdtRegressor> {
        let mut model = build_ensemble(self.config.clone());
        model.fit_weighted(x, y, weights)?;
        Ok(model)
    }

    /// Train and save every target independently. A failing target is logged
    /// and reported in the summary; the others are still saved.
    pub fn train_multi_target(&self, data: &GroundTruth, store: &ModelStore) -> Result<TrainingSummary> {
        if data.is_empty() {
            return Err(ScoringError::EmptyDataset.into());
        }
        let mut summary = TrainingSummary {
            engine: self.config.model_type.engine_name().to_string(),
            trained_at: Utc::now().to_rfc3339(),
            n_samples: data.len(),
            n_features: data.x.ncols(),
            targets: BTreeMap::new(),
            failed: BTreeMap::new(),
        };

        for target in Target::ALL {
            log::info!("Training target '{}' on {} samples", target, data.len());
            let result = self
                .train(&data.x, data.labels(target), None)
                .and_then(|(model, cv_metrics)| {
                    let top_features =
                        feature_importance_report(&model, &data.feature_names, self.top_features);
                    let info = ArtifactInfo {
                        cv_metrics,
                        feature_names: data.feature_names.clone(),
                        top_features,
                        n_samples: data.len(),
                    };
                    store.save(target, &model, info)
                });
            match result {
                Ok(metadata) => {
                    summary.targets.insert(
                        target,
                        TargetSummary {
                            version: metadata.version,
                            cv_metrics: metadata.cv_metrics.summary(),
                            top_features: metadata
                                .top_features
                                .into_iter()
                                .take(SUMMARY_TOP_FEATURES)
                                .collect(),
                        },
                    );
                }
                Err(e) => {
                    log::error!("Training target '{}' failed: {:#}", target, e);
                    summary.failed.insert(target, format!("{:#}", e));
                }
            }
        }

        fs::create_dir_all(store.root())
            .with_context(|| format!("Failed to create {}", store.root().display()))?;
        let path = store.root().join(TRAINING_SUMMARY_FILE);
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialize training summary")?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!(
            "Trained {}/{} targets, summary at {}",
            summary.targets.len(),
            Target::ALL.len(),
            path.display()
        );
        Ok(summary)
    }
}

/// Shuffled k-fold split. Returns `(train, test)` index pairs in fold order;
/// each row appears in exactly one test fold.
pub fn kfold_indices(n_samples: usize, n_folds: usize, seed: u64) -> Vec<(Vec<usize>, Vec<usize>)> {
    let mut indices: Vec<usize> = (0..n_samples).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    (0..n_folds)
        .map(|fold| {
            let start = fold * n_samples / n_folds;
            let end = (fold + 1) * n_samples / n_folds;
            let mut test = indices[start..end].to_vec();
            let mut train: Vec<usize> = indices[..start]
                .iter()
                .chain(&indices[end..])
                .copied()
                .collect();
            test.sort_unstable();
            train.sort_unstable();
            (train, test)
        })
        .collect()
}

pub fn evaluate(model: &dyn Regressor, x: &Array2<f32>, y: &[f32]) -> RegressionMetrics {
    RegressionMetrics::evaluate(y, &model.predict(x))
}

/// Features ranked by importance, highest first, at most `top_n` entries.
pub fn feature_importance_report(
    model: &dyn Regressor,
    feature_names: &[String],
    top_n: usize,
) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = model
        .feature_importances()
        .into_iter()
        .enumerate()
        .map(|(i, importance)| FeatureImportance {
            feature: feature_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("f{}", i)),
            importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked.truncate(top_n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ModelConfig {
        ModelConfig {
            learning_rate: 0.2,
            model_type: ModelType::GBDT {
                n_estimators: 30,
                max_depth: 3,
                subsample: 0.8,
                colsample_bytree: 1.0,
                reg_alpha: 0.0,
                reg_lambda: 1.0,
                min_child_weight: 1.0,
                max_bins: 32,
                seed: 42,
            },
        }
    }

    fn linear_data(n: usize) -> (Array2<f32>, Vec<f32>) {
        let mut data = Vec::new();
        let mut y = Vec::new();
        for i in 0..n {
            let a = (i % 10) as f32;
            let b = ((i * 3) % 7) as f32;
            data.extend_from_slice(&[a, b]);
            y.push(1.0 + 0.8 * a);
        }
        (Array2::from_shape_vec((n, 2), data).unwrap(), y)
    }

    #[test]
    fn kfold_covers_every_row_once() {
        let folds = kfold_indices(23, 5, 42);
        assert_eq!(folds.len(), 5);
        let mut seen: Vec<usize> = folds.iter().flat_map(|(_, test)| test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..23).collect::<Vec<_>>());
        for (train, test) in &folds {
            assert_eq!(train.len() + test.len(), 23);
        }
        assert_eq!(kfold_indices(23, 5, 42), folds);
    }

    #[test]
    fn cv_metrics_are_reproducible() {
        let (x, y) = linear_data(100);
        let trainer = ModelTrainer::new(small_config(), 5);
        let (_, a) = trainer.train(&x, &y, None).unwrap();
        let (_, b) = trainer.train(&x, &y, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.n_folds, 5);
        assert!(a.r2 > 0.9, "r2 was {}", a.r2);
    }

    #[test]
    fn importance_report_ranks_informative_feature_first() {
        let (x, y) = linear_data(100);
        let trainer = ModelTrainer::new(small_config(), 3);
        let (model, _) = trainer.train(&x, &y, None).unwrap();
        let names = vec!["a".to_string(), "b".to_string()];
        let report = feature_importance_report(&model, &names, 1);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].feature, "a");
    }

    #[test]
    fn full_fit_uses_the_configured_engine() {
        let (x, y) = linear_data(40);
        let trainer = ModelTrainer::new(small_config(), 3);
        let model = trainer.fit_full(&x, &y, None).unwrap();
        assert_eq!(model.name(), build_model(small_config()).name());
    }

    #[test]
    fn tiny_dataset_skips_cross_validation() {
        let (x, y) = linear_data(1);
        let trainer = ModelTrainer::new(small_config(), 5);
        let (model, cv) = trainer.train(&x, &y, None).unwrap();
        assert_eq!(cv.n_folds, 0);
        assert!(model.is_fitted());
    }
}
