use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Central configuration for the boosted models trained by the crate.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub learning_rate: f32,

    #[serde(flatten)]
    pub model_type: ModelType,
}

/// Supported model engines and their hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum ModelType {
    GBDT {
        n_estimators: usize,
        max_depth: usize,
        /// Row sampling rate per boosting round.
        subsample: f32,
        /// Column sampling rate per tree.
        colsample_bytree: f32,
        reg_alpha: f64,
        reg_lambda: f64,
        min_child_weight: f64,
        max_bins: usize,
        seed: u64,
    },
}

impl ModelType {
    /// Identifier written into artifact metadata.
    pub fn engine_name(&self) -> &'static str {
        match self {
            ModelType::GBDT { .. } => "gbdt",
        }
    }
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::GBDT {
            n_estimators: 300,
            max_depth: 6,
            subsample: 0.8,
            colsample_bytree: 0.8,
            reg_alpha: 0.1,
            reg_lambda: 1.0,
            min_child_weight: 1.0,
            max_bins: 256,
            seed: 42,
        }
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gbdt" | "xgboost" => Ok(ModelType::default()),
            _ => Err(format!("Unknown model type: {}. Supported engines: gbdt", s)),
        }
    }
}

impl ModelConfig {
    pub fn new(learning_rate: f32, model_type: ModelType) -> Self {
        Self {
            learning_rate,
            model_type,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            model_type: ModelType::default(),
        }
    }
}

/// Knobs of the confidence-gated retraining pipeline.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetrainConfig {
    /// Minimum bootstrap confidence for an external record to be used.
    pub confidence_threshold: f64,
    /// Minimum number of external records (before and after filtering).
    pub min_external: usize,
    pub n_bootstrap: usize,
    /// Lower bound of the fraction of boosting rounds kept per bootstrap draw.
    pub bootstrap_min_fraction: f64,
    pub external_base_weight: f64,
    pub ground_truth_weight: f64,
    pub min_external_weight: f64,
    pub max_external_weight: f64,
    pub holdout_fraction: f64,
    /// Absolute R² floor on held-out ground truth.
    pub min_r2: f64,
    /// Largest tolerated R² drop versus the deployed model.
    pub max_r2_drop: f64,
    /// Lower bound for the std normaliser used in the confidence score.
    /// Departs from the plain max-std normaliser: a batch whose largest std
    /// is below this floor is not spread over the full confidence range.
    pub min_std_scale: f64,
    pub seed: u64,
    pub dry_run: bool,
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            min_external: 10,
            n_bootstrap: 10,
            bootstrap_min_fraction: 0.7,
            external_base_weight: 0.5,
            ground_truth_weight: 1.0,
            min_external_weight: 0.1,
            max_external_weight: 0.7,
            holdout_fraction: 0.2,
            min_r2: 0.80,
            max_r2_drop: 0.03,
            min_std_scale: 0.5,
            seed: 42,
            dry_run: false,
        }
    }
}

/// Top-level configuration shared by training, serving and retraining.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub model_dir: PathBuf,
    /// Year used to turn a founding year into a company age.
    pub reference_year: i32,
    pub n_folds: usize,
    /// Number of feature importances stored with each artifact.
    pub top_features: usize,
    pub model: ModelConfig,
    pub retrain: RetrainConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            reference_year: 2026,
            n_folds: 5,
            top_features: 15,
            model: ModelConfig::default(),
            retrain: RetrainConfig::default(),
        }
    }
}

/// Load a scoring configuration from a JSON file. Missing keys keep their defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ScoringConfig> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
    let config: ScoringConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
    Ok(config)
}
