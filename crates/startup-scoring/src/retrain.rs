//! Confidence-gated semi-supervised retraining.
//!
//! External records without labels are pseudo-labelled by the deployed
//! models. Each record gets a confidence score from bootstrap predictions
//! that keep a random prefix of the boosting rounds. Confident records are
//! blended into the ground truth with down-weighted sample weights. A
//! candidate model per target is then validated on a fixed ground-truth
//! holdout, and the deployed models are only replaced when no target gets
//! worse than the configured guard allows.
//!
//! Stages, in order:
//!
//! 1. featurise external records (failures are dropped)
//! 2. skip when fewer than `min_external` records remain
//! 3. pseudo-label with bootstrap confidence
//! 4. skip when fewer than `min_external` records are confident
//! 5. baseline metrics of the deployed models on the holdout
//! 6. train candidates on the training split plus external rows
//! 7. roll back when any target falls below `min_r2` or drops by more than `max_r2_drop`
//! 8. refit on all ground truth plus external rows, write every version, then
//!    promote them together and append to the retrain log
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ModelConfig, RetrainConfig, ScoringConfig};
use crate::dataset::GroundTruth;
use crate::error::ScoringError;
use crate::math::Array2;
use crate::metrics::{CvMetrics, RegressionMetrics};
use crate::predictor::{self, PredictorHandle, ScorePredictor, MAX_SCORE, MIN_SCORE};
use crate::record::ExternalRecord;
use crate::store::ArtifactInfo;
use crate::target::Target;
use crate::trainer::{feature_importance_report, ModelTrainer};

pub const RETRAIN_LOG_FILE: &str = "retrain_log.jsonl";

/// Pseudo-label used for targets without a deployed model.
const FALLBACK_PSEUDO_LABEL: f64 = 3.0;

/// Metrics reported for a target without a deployed model.
const MISSING_MODEL_MAE: f64 = 999.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainStatus {
    Success,
    Rollback,
    Skipped,
    DryRun,
}

impl std::fmt::Display for RetrainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            RetrainStatus::Success => "success",
            RetrainStatus::Rollback => "rollback",
            RetrainStatus::Skipped => "skipped",
            RetrainStatus::DryRun => "dry_run",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainOutcome {
    pub timestamp: String,
    pub status: RetrainStatus,
    pub reason: String,
    pub n_ground_truth: usize,
    /// External records that survived feature extraction.
    pub n_external: usize,
    /// External records above the confidence threshold.
    pub n_external_used: usize,
    /// Deployed models on the holdout split.
    pub before: BTreeMap<Target, RegressionMetrics>,
    /// Candidate models on the same holdout split.
    pub after: BTreeMap<Target, RegressionMetrics>,
    /// Version saved for each target on success.
    #[serde(default)]
    pub versions: BTreeMap<Target, String>,
}

impl RetrainOutcome {
    fn new(n_ground_truth: usize) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            status: RetrainStatus::Skipped,
            reason: String::new(),
            n_ground_truth,
            n_external: 0,
            n_external_used: 0,
            before: BTreeMap::new(),
            after: BTreeMap::new(),
            versions: BTreeMap::new(),
        }
    }

    fn finish(mut self, status: RetrainStatus, reason: String) -> Self {
        match status {
            RetrainStatus::Rollback => log::warn!("{}", reason),
            _ => log::info!("{}", reason),
        }
        self.status = status;
        self.reason = reason;
        self
    }
}

/// Bootstrap pseudo-labels for a batch of external rows.
#[derive(Debug, Clone, PartialEq)]
pub struct PseudoLabels {
    pub labels: BTreeMap<Target, Vec<f32>>,
    /// One value in [0, 1] per row.
    pub confidence: Vec<f64>,
}

/// Mean of `n_bootstrap` truncated-ensemble predictions per target and row.
///
/// Draw `b` keeps the first `max(1, floor(n_rounds * u))` boosting rounds of
/// every model, where `u ~ U(min_fraction, 1)` is drawn once from a generator
/// seeded with `seed + b`. Predictions are clamped to the score range before
/// averaging. Confidence is `1 - avg_std / max(max_std, min_std_scale)` where
/// `avg_std` is the row's population std averaged over targets.
pub fn generate_pseudo_labels(
    predictor: &ScorePredictor,
    x: &Array2<f32>,
    config: &RetrainConfig,
) -> PseudoLabels {
    let n_bootstrap = config.n_bootstrap.max(1);
    let fractions: Vec<f64> = (0..n_bootstrap)
        .map(|b| {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(b as u64));
            let lo = config.bootstrap_min_fraction.clamp(0.0, 1.0);
            if lo >= 1.0 {
                1.0
            } else {
                rng.gen_range(lo..1.0)
            }
        })
        .collect();

    // per row: (target means, mean std over targets)
    let per_row: Vec<(Vec<f64>, f64)> = x
        .rows()
        .collect::<Vec<_>>()
        .par_iter()
        .map(|row| {
            let mut means = Vec::with_capacity(Target::ALL.len());
            let mut stds = Vec::with_capacity(Target::ALL.len());
            for target in Target::ALL {
                let draws: Vec<f64> = match predictor.model(target) {
                    Some(model) => {
                        let staged = model.staged_predictions(row);
                        let n_rounds = staged.len() - 1;
                        fractions
                            .iter()
                            .map(|u| {
                                let k = ((n_rounds as f64 * u).floor() as usize).max(1).min(n_rounds);
                                staged[k].clamp(MIN_SCORE, MAX_SCORE)
                            })
                            .collect()
                    }
                    None => vec![FALLBACK_PSEUDO_LABEL; n_bootstrap],
                };
                let (mean, std) = mean_std(&draws);
                means.push(mean);
                stds.push(std);
            }
            let avg_std = stds.iter().sum::<f64>() / stds.len() as f64;
            (means, avg_std)
        })
        .collect();

    let max_std = per_row.iter().map(|(_, s)| *s).fold(0.0, f64::max);
    let scale = max_std.max(config.min_std_scale).max(f64::EPSILON);
    let confidence = per_row
        .iter()
        .map(|(_, s)| (1.0 - s / scale).clamp(0.0, 1.0))
        .collect();

    let labels = Target::ALL
        .iter()
        .enumerate()
        .map(|(t, &target)| (target, per_row.iter().map(|(m, _)| m[t] as f32).collect()))
        .collect();

    PseudoLabels { labels, confidence }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Ground-truth rows first, then one weight per external row:
/// `external_base_weight * confidence * reliability`, clamped to
/// `[min_external_weight, max_external_weight]`. Missing reliability counts as 1.
pub fn compute_sample_weights(
    n_ground_truth: usize,
    confidence: &[f64],
    reliability: &[Option<f64>],
    config: &RetrainConfig,
) -> Vec<f32> {
    let mut weights = vec![config.ground_truth_weight as f32; n_ground_truth];
    weights.extend(confidence.iter().enumerate().map(|(i, &c)| {
        let r = reliability.get(i).copied().flatten().unwrap_or(1.0);
        (config.external_base_weight * c * r)
            .clamp(config.min_external_weight, config.max_external_weight) as f32
    }));
    weights
}

pub struct RetrainingPipeline<'a> {
    handle: &'a PredictorHandle,
    model: ModelConfig,
    config: RetrainConfig,
    top_features: usize,
}

impl<'a> RetrainingPipeline<'a> {
    pub fn new(handle: &'a PredictorHandle, model: ModelConfig, config: RetrainConfig) -> Self {
        Self {
            handle,
            model,
            config,
            top_features: 15,
        }
    }

    pub fn with_top_features(mut self, top_features: usize) -> Self {
        self.top_features = top_features;
        self
    }

    pub fn config(&self) -> &RetrainConfig {
        &self.config
    }

    pub fn log_path(&self) -> PathBuf {
        self.handle.store().root().join(RETRAIN_LOG_FILE)
    }

    /// Run every stage. Skipped, rolled-back and dry runs leave the model
    /// directory untouched; only I/O and model failures are errors.
    pub fn run(&self, ground_truth: &GroundTruth, external: &[ExternalRecord]) -> Result<RetrainOutcome> {
        if ground_truth.is_empty() {
            return Err(ScoringError::EmptyDataset.into());
        }
        let cfg = &self.config;
        let mut outcome = RetrainOutcome::new(ground_truth.len());

        log::info!(
            "Retraining: {} ground-truth samples, {} external records",
            ground_truth.len(),
            external.len()
        );

        // 1. featurise
        let extractor = self.handle.extractor();
        let mut x_ext = Array2::empty(ground_truth.x.ncols());
        let mut reliability = Vec::new();
        for e in external {
            match extractor.try_extract(&e.record) {
                Ok(row) => {
                    x_ext.push_row(&row).with_context(|| {
                        format!(
                            "External features do not match the ground-truth layout ({} columns)",
                            ground_truth.x.ncols()
                        )
                    })?;
                    reliability.push(e.source_reliability);
                }
                Err(err) => log::warn!(
                    "Dropping external record '{}': {}",
                    e.record.name.as_deref().unwrap_or("?"),
                    err
                ),
            }
        }
        outcome.n_external = x_ext.nrows();

        // 2.
        if x_ext.nrows() < cfg.min_external {
            let reason = format!(
                "Not enough external records: {} < {}",
                x_ext.nrows(),
                cfg.min_external
            );
            return Ok(outcome.finish(RetrainStatus::Skipped, reason));
        }

        // 3.
        let predictor = self.handle.get();
        if !predictor.is_ready() {
            return Err(ScoringError::ModelsNotReady.into());
        }
        log::info!("Generating pseudo-labels ({} bootstrap draws)", cfg.n_bootstrap);
        let pseudo = generate_pseudo_labels(&predictor, &x_ext, cfg);

        // 4.
        let confident: Vec<usize> = (0..x_ext.nrows())
            .filter(|&i| pseudo.confidence[i] >= cfg.confidence_threshold)
            .collect();
        outcome.n_external_used = confident.len();
        if confident.len() < cfg.min_external {
            let reason = format!(
                "Too few confident pseudo-labels: {} < {} (confidence threshold {})",
                confident.len(),
                cfg.min_external,
                cfg.confidence_threshold
            );
            return Ok(outcome.finish(RetrainStatus::Skipped, reason));
        }
        log::info!(
            "Confident external records: {} of {} (threshold {:.2})",
            confident.len(),
            x_ext.nrows(),
            cfg.confidence_threshold
        );
        let x_conf = x_ext.select_rows(&confident);
        let conf: Vec<f64> = confident.iter().map(|&i| pseudo.confidence[i]).collect();
        let rel: Vec<Option<f64>> = confident.iter().map(|&i| reliability[i]).collect();
        let y_conf = |target: Target| -> Vec<f32> {
            let labels = &pseudo.labels[&target];
            confident.iter().map(|&i| labels[i]).collect()
        };

        // 5.
        let (train_idx, test_idx) = ground_truth.holdout_split(cfg.holdout_fraction, cfg.seed);
        let train = ground_truth.subset(&train_idx);
        let holdout = ground_truth.subset(&test_idx);
        log::info!(
            "Baseline on {} held-out ground-truth samples",
            holdout.len()
        );
        for target in Target::ALL {
            let metrics = match predictor.model(target) {
                Some(model) => holdout_metrics(&holdout, target, |row| model.predict_row(row)),
                None => RegressionMetrics {
                    mae: MISSING_MODEL_MAE,
                    rmse: MISSING_MODEL_MAE,
                    r2: 0.0,
                },
            };
            log::info!("  {}: R2={:.4} MAE={:.4}", target, metrics.r2, metrics.mae);
            outcome.before.insert(target, metrics);
        }

        // 6.
        log::info!(
            "Training candidates on {} ground-truth + {} external samples",
            train.len(),
            x_conf.nrows()
        );
        let trainer = ModelTrainer::new(self.model.clone(), 0);
        let x_train = train.x.vstack(&x_conf).context("Failed to stack training features")?;
        let w_train = compute_sample_weights(train.len(), &conf, &rel, cfg);
        let mut rollback = false;
        for target in Target::ALL {
            let mut y = train.labels(target).to_vec();
            y.extend(y_conf(target));
            let candidate = trainer
                .fit_full(&x_train, &y, Some(w_train.as_slice()))
                .with_context(|| format!("Failed to train candidate for '{}'", target))?;
            let after = holdout_metrics(&holdout, target, |row| candidate.predict_row(row));
            let before = outcome.before[&target];
            let drop = before.r2 - after.r2;
            log::info!(
                "  {}: R2={:.4} (was {:.4}, {:+.4}) MAE={:.4}",
                target,
                after.r2,
                before.r2,
                -drop,
                after.mae
            );
            if after.r2 < cfg.min_r2 {
                log::warn!(
                    "R2 for '{}' below floor: {:.4} < {:.4}",
                    target,
                    after.r2,
                    cfg.min_r2
                );
                rollback = true;
            }
            if drop > cfg.max_r2_drop {
                log::warn!(
                    "R2 for '{}' dropped by {:.4} (tolerance {:.4})",
                    target,
                    drop,
                    cfg.max_r2_drop
                );
                rollback = true;
            }
            outcome.after.insert(target, after);
        }

        // 7.
        if rollback {
            let reason = "Held-out ground-truth metrics fell below the guard; deployed models kept".to_string();
            return Ok(outcome.finish(RetrainStatus::Rollback, reason));
        }
        if cfg.dry_run {
            let reason = "Dry run: validation passed, models not saved".to_string();
            return Ok(outcome.finish(RetrainStatus::DryRun, reason));
        }

        // 8.
        log::info!("Refitting on all ground truth + {} external samples", x_conf.nrows());
        let store = self.handle.store();
        let x_full = ground_truth.x.vstack(&x_conf).context("Failed to stack full features")?;
        let w_full = compute_sample_weights(ground_truth.len(), &conf, &rel, cfg);
        let mut refitted = Vec::with_capacity(Target::ALL.len());
        for target in Target::ALL {
            let mut y = ground_truth.labels(target).to_vec();
            y.extend(y_conf(target));
            let model = trainer
                .fit_full(&x_full, &y, Some(w_full.as_slice()))
                .with_context(|| format!("Failed to refit '{}'", target))?;
            refitted.push((target, model));
        }

        // nothing is promoted until every version is on disk
        let mut saved = Vec::with_capacity(refitted.len());
        for (target, model) in &refitted {
            let info = ArtifactInfo {
                cv_metrics: CvMetrics::from_folds(vec![outcome.after[target]]),
                feature_names: ground_truth.feature_names.clone(),
                top_features: feature_importance_report(model, &ground_truth.feature_names, self.top_features),
                n_samples: x_full.nrows(),
            };
            let metadata = store.save_version(*target, model, info)?;
            saved.push((*target, metadata.version));
        }
        store.promote_all(&saved)?;
        for (target, version) in saved {
            log::info!("Promoted {} model version {}", target, version);
            outcome.versions.insert(target, version);
        }

        let reason = format!(
            "Retrained on {} ground-truth + {} external samples",
            ground_truth.len(),
            x_conf.nrows()
        );
        let outcome = outcome.finish(RetrainStatus::Success, reason);
        self.append_log(&outcome)?;
        self.handle.reset();
        Ok(outcome)
    }

    fn append_log(&self, outcome: &RetrainOutcome) -> Result<()> {
        let path = self.log_path();
        fs::create_dir_all(self.handle.store().root())
            .with_context(|| format!("Failed to create {}", self.handle.store().root().display()))?;
        let line = serde_json::to_string(outcome).context("Failed to serialize retrain outcome")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(file, "{}", line).with_context(|| format!("Failed to append to {}", path.display()))?;
        Ok(())
    }
}

/// Clamped predictions on the holdout, metrics rounded to four decimals.
fn holdout_metrics<F>(holdout: &GroundTruth, target: Target, predict: F) -> RegressionMetrics
where
    F: Fn(&[f32]) -> f64,
{
    let y_pred: Vec<f32> = holdout
        .x
        .rows()
        .map(|row| predict(row).clamp(MIN_SCORE, MAX_SCORE) as f32)
        .collect();
    RegressionMetrics::evaluate(holdout.labels(target), &y_pred).rounded()
}

/// Retrain the models under `config.model_dir` and refresh the process-wide
/// predictor when new models were saved.
pub fn retrain(
    ground_truth: &GroundTruth,
    external: &[ExternalRecord],
    config: &ScoringConfig,
) -> Result<RetrainOutcome> {
    let handle = PredictorHandle::from_config(config);
    let outcome = RetrainingPipeline::new(&handle, config.model.clone(), config.retrain.clone())
        .with_top_features(config.top_features)
        .run(ground_truth, external)?;
    if outcome.status == RetrainStatus::Success {
        predictor::reset_global();
    }
    Ok(outcome)
}

/// Read the retrain log, oldest entry first. A missing log is empty.
pub fn read_retrain_log(model_dir: &std::path::Path) -> Result<Vec<RetrainOutcome>> {
    let path = model_dir.join(RETRAIN_LOG_FILE);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).with_context(|| format!("Malformed entry in {}", path.display())))
        .collect()
}
