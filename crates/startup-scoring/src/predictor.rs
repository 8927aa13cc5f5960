//! Serving scores and attributions from the latest stored models.
//!
//! [`ScorePredictor`] is immutable once loaded and safe to share across
//! threads. [`PredictorHandle`] owns the lazily loaded instance: the first
//! caller loads it under a write lock, later callers only take a read lock
//! and clone an `Arc`. [`PredictorHandle::reset`] drops the instance so the
//! next access picks up newly promoted models.
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::error::ScoringError;
use crate::features::FeatureExtractor;
use crate::models::{GbdtRegressor, TreeExplainer};
use crate::record::RawRecord;
use crate::store::{ModelMetadata, ModelStore};
use crate::target::Target;

pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 10.0;

/// Target → score, clamped to [1, 10] and rounded to two decimals. Targets
/// without a loaded model score 0.0.
pub type PredictionResult = BTreeMap<Target, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub contribution: f64,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub target: Target,
    /// Expected model output over the training distribution.
    pub base_value: f64,
    /// Clamped model output, not `base_value` plus the contributions.
    pub predicted_score: f64,
    pub top_positive: Vec<FeatureContribution>,
    pub top_negative: Vec<FeatureContribution>,
}

pub fn clamp_score(raw: f64) -> f64 {
    let clamped = raw.clamp(MIN_SCORE, MAX_SCORE);
    (clamped * 100.0).round() / 100.0
}

struct LoadedModel {
    model: Arc<GbdtRegressor>,
    metadata: ModelMetadata,
    explainer: OnceLock<TreeExplainer>,
}

impl LoadedModel {
    fn explainer(&self) -> &TreeExplainer {
        self.explainer
            .get_or_init(|| TreeExplainer::new(Arc::clone(&self.model)))
    }
}

pub struct ScorePredictor {
    extractor: FeatureExtractor,
    feature_names: Vec<String>,
    models: BTreeMap<Target, LoadedModel>,
}

impl ScorePredictor {
    /// Load the latest model of every target. Missing, unreadable or
    /// mismatched artifacts are logged and skipped.
    pub fn load(store: &ModelStore, extractor: FeatureExtractor) -> Self {
        let mut predictor = Self::empty(extractor);
        for target in Target::ALL {
            match store.load_latest(target) {
                Ok(Some((model, metadata))) => {
                    if let Err(e) = predictor.insert(target, model, metadata) {
                        log::error!("Refusing {} model: {}", target, e);
                    }
                }
                Ok(None) => log::warn!(
                    "No trained model for target '{}' in {}",
                    target,
                    store.root().display()
                ),
                Err(e) => log::error!("Failed to load {} model: {:#}", target, e),
            }
        }
        log::info!(
            "Loaded {}/{} scoring models",
            predictor.models.len(),
            Target::ALL.len()
        );
        predictor
    }

    /// A predictor without models; every score is 0.0 until models are inserted.
    pub fn empty(extractor: FeatureExtractor) -> Self {
        Self {
            feature_names: extractor.feature_names(),
            extractor,
            models: BTreeMap::new(),
        }
    }

    /// Register a model for `target`. Its stored feature list must match the extractor's.
    pub fn insert(
        &mut self,
        target: Target,
        model: GbdtRegressor,
        metadata: ModelMetadata,
    ) -> Result<(), ScoringError> {
        if metadata.feature_names != self.feature_names || model.n_features() != self.feature_names.len() {
            return Err(ScoringError::FeatureMismatch {
                target: target.to_string(),
                expected: self.feature_names.len(),
                found: metadata.feature_names.len(),
            });
        }
        self.models.insert(
            target,
            LoadedModel {
                model: Arc::new(model),
                metadata,
                explainer: OnceLock::new(),
            },
        );
        Ok(())
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// True when at least the `overall` model is loaded.
    pub fn is_ready(&self) -> bool {
        self.models.contains_key(&Target::Overall)
    }

    /// Version of the loaded `overall` model.
    pub fn version(&self) -> Option<&str> {
        self.models
            .get(&Target::Overall)
            .map(|m| m.metadata.version.as_str())
    }

    pub fn loaded_targets(&self) -> Vec<Target> {
        self.models.keys().copied().collect()
    }

    pub fn model(&self, target: Target) -> Option<&Arc<GbdtRegressor>> {
        self.models.get(&target).map(|m| &m.model)
    }

    pub fn metadata(&self, target: Target) -> Option<&ModelMetadata> {
        self.models.get(&target).map(|m| &m.metadata)
    }

    fn score_row(&self, row: &[f32]) -> PredictionResult {
        Target::ALL
            .iter()
            .map(|&target| {
                let score = self
                    .models
                    .get(&target)
                    .map_or(0.0, |m| clamp_score(m.model.predict_row(row)));
                (target, score)
            })
            .collect()
    }

    pub fn predict(&self, record: &RawRecord) -> PredictionResult {
        self.score_row(&self.extractor.extract(record))
    }

    /// Same results as calling [`predict`](Self::predict) on each record.
    pub fn predict_batch(&self, records: &[RawRecord]) -> Vec<PredictionResult> {
        let x = self.extractor.extract_batch(records);
        x.rows().map(|row| self.score_row(row)).collect()
    }

    /// Attribute one prediction to its features. `None` when `target` has no model.
    pub fn explain(&self, record: &RawRecord, target: Target, top_n: usize) -> Option<Explanation> {
        let loaded = self.models.get(&target)?;
        let row = self.extractor.extract(record);
        let explainer = loaded.explainer();
        let shap = explainer.shap_values(&row);

        let mut contributions: Vec<FeatureContribution> = shap
            .iter()
            .enumerate()
            .map(|(i, &contribution)| FeatureContribution {
                feature: self.feature_names[i].clone(),
                contribution,
                value: row[i],
            })
            .collect();
        contributions.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));

        let top_positive = contributions
            .iter()
            .filter(|c| c.contribution > 0.0)
            .take(top_n)
            .cloned()
            .collect();
        let top_negative = contributions
            .iter()
            .filter(|c| c.contribution < 0.0)
            .take(top_n)
            .cloned()
            .collect();

        Some(Explanation {
            target,
            base_value: explainer.expected_value(),
            predicted_score: clamp_score(loaded.model.predict_row(&row)),
            top_positive,
            top_negative,
        })
    }

    /// [`explain`](Self::explain) for every loaded target.
    pub fn explain_all(&self, record: &RawRecord, top_n: usize) -> BTreeMap<Target, Explanation> {
        Target::ALL
            .iter()
            .filter_map(|&t| self.explain(record, t, top_n).map(|e| (t, e)))
            .collect()
    }
}

/// Lazily initialised, resettable holder of a [`ScorePredictor`].
pub struct PredictorHandle {
    store: ModelStore,
    extractor: FeatureExtractor,
    slot: RwLock<Option<Arc<ScorePredictor>>>,
}

impl PredictorHandle {
    pub fn new<P: Into<PathBuf>>(model_dir: P, extractor: FeatureExtractor) -> Self {
        Self {
            store: ModelStore::new(model_dir),
            extractor,
            slot: RwLock::new(None),
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(
            config.model_dir.clone(),
            FeatureExtractor::new(config.reference_year),
        )
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// The loaded predictor, loading it on first use. Concurrent first
    /// callers wait for a single load.
    pub fn get(&self) -> Arc<ScorePredictor> {
        if let Some(p) = self.slot.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return Arc::clone(p);
        }
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        if let Some(p) = slot.as_ref() {
            return Arc::clone(p);
        }
        let predictor = Arc::new(ScorePredictor::load(&self.store, self.extractor));
        *slot = Some(Arc::clone(&predictor));
        predictor
    }

    pub fn is_loaded(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Drop the loaded predictor. In-flight users keep their `Arc`.
    pub fn reset(&self) {
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

static GLOBAL: OnceCell<PredictorHandle> = OnceCell::new();

/// Configure the process-wide handle. Returns false if it was already set.
pub fn init_global(config: &ScoringConfig) -> bool {
    GLOBAL.set(PredictorHandle::from_config(config)).is_ok()
}

/// The process-wide handle, configured with defaults unless [`init_global`] ran first.
pub fn global() -> &'static PredictorHandle {
    GLOBAL.get_or_init(|| PredictorHandle::from_config(&ScoringConfig::default()))
}

/// Drop the process-wide predictor, if one was configured, so the next
/// access reloads from disk.
pub fn reset_global() {
    if let Some(handle) = GLOBAL.get() {
        handle.reset();
    }
}
