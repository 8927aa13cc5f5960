mod common;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tempfile::TempDir;

use startup_scoring::config::RetrainConfig;
use startup_scoring::retrain::{generate_pseudo_labels, read_retrain_log, RETRAIN_LOG_FILE};
use startup_scoring::store::LATEST;
use startup_scoring::{
    ExternalRecord, GroundTruth, ModelStore, PredictorHandle, RawRecord, RetrainOutcome,
    RetrainStatus, RetrainingPipeline, ScoringConfig, Target,
};

use common::{config_for, synthetic_record, train_into};

const N_GROUND_TRUTH: usize = 60;

fn trained() -> (TempDir, ScoringConfig, GroundTruth) {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let (data, _) = train_into(&config, N_GROUND_TRUTH);
    (dir, config, data)
}

fn loose_guard() -> RetrainConfig {
    RetrainConfig {
        min_external: 3,
        confidence_threshold: 0.0,
        min_r2: f64::NEG_INFINITY,
        max_r2_drop: f64::INFINITY,
        ..RetrainConfig::default()
    }
}

fn external(indices: impl IntoIterator<Item = usize>) -> Vec<ExternalRecord> {
    indices
        .into_iter()
        .map(|i| ExternalRecord::new(synthetic_record(i)).with_source("registry"))
        .collect()
}

fn run(
    config: &ScoringConfig,
    data: &GroundTruth,
    retrain: RetrainConfig,
    external: &[ExternalRecord],
) -> RetrainOutcome {
    let handle = PredictorHandle::from_config(config);
    RetrainingPipeline::new(&handle, config.model.clone(), retrain)
        .run(data, external)
        .unwrap()
}

fn latest_bytes(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let store = ModelStore::new(dir);
    let mut out = BTreeMap::new();
    for target in Target::ALL {
        for path in [store.model_path(target, LATEST), store.meta_path(target, LATEST)] {
            out.insert(path.display().to_string(), fs::read(&path).unwrap());
        }
    }
    out
}

fn latest_versions(dir: &Path) -> BTreeMap<Target, String> {
    let store = ModelStore::new(dir);
    Target::ALL
        .iter()
        .map(|&t| (t, store.latest_version(t).unwrap().unwrap()))
        .collect()
}

// ---------------------------------------------------------------------------
// Short-circuits
// ---------------------------------------------------------------------------

#[test]
fn too_few_external_records_skip_without_writing() {
    let (dir, config, data) = trained();
    let before = latest_bytes(dir.path());

    let retrain = RetrainConfig {
        min_external: 10,
        ..loose_guard()
    };
    let outcome = run(&config, &data, retrain, &external(0..3));

    assert_eq!(outcome.status, RetrainStatus::Skipped);
    assert_eq!(outcome.n_external, 3);
    assert!(!outcome.reason.is_empty());
    assert_eq!(latest_bytes(dir.path()), before);
    assert!(!dir.path().join(RETRAIN_LOG_FILE).exists());
}

#[test]
fn empty_external_records_are_dropped() {
    let (dir, config, data) = trained();
    let mut records = external(0..2);
    records.push(ExternalRecord::new(RawRecord::default()));

    let outcome = run(&config, &data, loose_guard(), &records);
    assert_eq!(outcome.status, RetrainStatus::Skipped);
    assert_eq!(outcome.n_external, 2);
    assert_eq!(read_retrain_log(dir.path()).unwrap().len(), 0);
}

#[test]
fn unconfident_pseudo_labels_skip() {
    let (dir, config, data) = trained();
    let before = latest_bytes(dir.path());
    let retrain = RetrainConfig {
        confidence_threshold: 1.5,
        ..loose_guard()
    };
    let outcome = run(&config, &data, retrain, &external(0..5));
    assert_eq!(outcome.status, RetrainStatus::Skipped);
    assert_eq!(outcome.n_external, 5);
    assert_eq!(outcome.n_external_used, 0);
    assert_eq!(latest_bytes(dir.path()), before);
}

#[test]
fn retraining_requires_deployed_models() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let data = GroundTruth::from_records(
        &common::synthetic_records(10),
        &startup_scoring::FeatureExtractor::default(),
    );
    let handle = PredictorHandle::from_config(&config);
    let result = RetrainingPipeline::new(&handle, config.model.clone(), loose_guard())
        .run(&data, &external(0..5));
    assert!(result.is_err());
}

// ---------------------------------------------------------------------------
// Confidence
// ---------------------------------------------------------------------------

#[test]
fn stable_predictions_are_confident() {
    let (_dir, config, data) = trained();
    let handle = PredictorHandle::from_config(&config);
    let rows = data.x.select_rows(&[0, 1, 2]);
    let pseudo = generate_pseudo_labels(&handle.get(), &rows, &RetrainConfig::default());
    assert_eq!(pseudo.confidence.len(), 3);
    for c in &pseudo.confidence {
        assert!((0.0..=1.0).contains(c));
    }
    for target in Target::ALL {
        for label in &pseudo.labels[&target] {
            assert!((1.0..=10.0).contains(label));
        }
    }

    let retrain = RetrainConfig {
        confidence_threshold: 0.8,
        dry_run: true,
        ..loose_guard()
    };
    let outcome = run(&config, &data, retrain, &external(0..3));
    assert_eq!(outcome.n_external_used, 3);
    assert_eq!(outcome.status, RetrainStatus::DryRun);
}

// ---------------------------------------------------------------------------
// Guard, dry run and promotion
// ---------------------------------------------------------------------------

#[test]
fn failing_guard_rolls_back() {
    let (dir, config, data) = trained();
    let versions = latest_versions(dir.path());
    let before = latest_bytes(dir.path());

    let retrain = RetrainConfig {
        min_r2: 2.0,
        ..loose_guard()
    };
    let outcome = run(&config, &data, retrain, &external(100..110));

    assert_eq!(outcome.status, RetrainStatus::Rollback);
    assert_eq!(outcome.before.len(), 6);
    assert_eq!(outcome.after.len(), 6);
    assert!(outcome.versions.is_empty());
    assert_eq!(latest_versions(dir.path()), versions);
    assert_eq!(latest_bytes(dir.path()), before);
    assert_eq!(ModelStore::new(dir.path()).versions(Target::Overall).unwrap().len(), 1);
}

#[test]
fn r2_drop_beyond_tolerance_rolls_back() {
    let (dir, config, data) = trained();
    let versions = latest_versions(dir.path());
    let before = latest_bytes(dir.path());

    // floor disabled; any candidate that fails to gain a full R2 point counts as a drop
    let retrain = RetrainConfig {
        min_r2: f64::NEG_INFINITY,
        max_r2_drop: -1.0,
        ..loose_guard()
    };
    let outcome = run(&config, &data, retrain, &external(100..110));

    assert_eq!(outcome.status, RetrainStatus::Rollback);
    assert!(Target::ALL
        .iter()
        .any(|t| outcome.before[t].r2 - outcome.after[t].r2 > -1.0));
    assert!(outcome.versions.is_empty());
    assert_eq!(latest_versions(dir.path()), versions);
    assert_eq!(latest_bytes(dir.path()), before);
    assert!(!dir.path().join(RETRAIN_LOG_FILE).exists());
}

#[test]
fn failed_promotion_keeps_every_previous_model() {
    let (dir, config, data) = trained();
    let versions = latest_versions(dir.path());
    let before = latest_bytes(dir.path());

    // a directory where the temp copy should go makes this target's promotion fail
    let store = ModelStore::new(dir.path());
    let latest = store.model_path(Target::TeamReadiness, LATEST);
    fs::create_dir_all(format!("{}.tmp", latest.display())).unwrap();

    let handle = PredictorHandle::from_config(&config);
    let result = RetrainingPipeline::new(&handle, config.model.clone(), loose_guard())
        .run(&data, &external(100..110));

    assert!(result.is_err());
    assert_eq!(latest_versions(dir.path()), versions);
    assert_eq!(latest_bytes(dir.path()), before);
    // new versions were written but never promoted
    assert_eq!(store.versions(Target::Overall).unwrap().len(), 2);
    assert_eq!(store.versions(Target::FinancialHealth).unwrap().len(), 2);
    assert!(!dir.path().join(RETRAIN_LOG_FILE).exists());
}

#[test]
fn dry_run_reports_metrics_only() {
    let (dir, config, data) = trained();
    let before = latest_bytes(dir.path());
    let retrain = RetrainConfig {
        dry_run: true,
        ..loose_guard()
    };
    let outcome = run(&config, &data, retrain, &external(100..110));
    assert_eq!(outcome.status, RetrainStatus::DryRun);
    assert_eq!(outcome.after.len(), 6);
    assert_eq!(latest_bytes(dir.path()), before);
    assert!(!dir.path().join(RETRAIN_LOG_FILE).exists());
}

#[test]
fn passing_guard_promotes_new_versions_and_logs() {
    let (dir, config, data) = trained();
    let old = latest_versions(dir.path());

    let handle = PredictorHandle::from_config(&config);
    let served = handle.get();
    let outcome = RetrainingPipeline::new(&handle, config.model.clone(), loose_guard())
        .run(&data, &external(100..110))
        .unwrap();

    assert_eq!(outcome.status, RetrainStatus::Success);
    assert_eq!(outcome.n_ground_truth, N_GROUND_TRUTH);
    assert_eq!(outcome.n_external_used, 10);
    assert_eq!(outcome.versions.len(), 6);

    let new = latest_versions(dir.path());
    for target in Target::ALL {
        assert_ne!(old[&target], new[&target]);
        assert_eq!(outcome.versions[&target], new[&target]);
    }

    // the old predictor keeps serving; the handle reloads the new one
    assert_eq!(served.version(), Some(old[&Target::Overall].as_str()));
    assert!(!handle.is_loaded());
    assert_eq!(handle.get().version(), Some(new[&Target::Overall].as_str()));

    let log = read_retrain_log(dir.path()).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, RetrainStatus::Success);
    assert_eq!(log[0].versions, outcome.versions);

    let meta = ModelStore::new(dir.path())
        .latest_metadata(Target::Overall)
        .unwrap()
        .unwrap();
    assert_eq!(meta.n_samples, N_GROUND_TRUTH + outcome.n_external_used);
}
