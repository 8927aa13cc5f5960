mod common;

use std::fs;

use startup_scoring::features::FEATURE_COUNT;
use startup_scoring::labeler::{label_record, score_innovation};
use startup_scoring::predictor::{MAX_SCORE, MIN_SCORE};
use startup_scoring::record::{parse_money, parse_readiness_level};
use startup_scoring::store::LATEST;
use startup_scoring::trainer::TRAINING_SUMMARY_FILE;
use startup_scoring::{FeatureExtractor, ModelStore, PredictorHandle, RawRecord, ScorePredictor, Target};

use common::{config_for, synthetic_record, synthetic_records, train_into};

// ---------------------------------------------------------------------------
// Parsing and labelling
// ---------------------------------------------------------------------------

#[test]
fn parsers_degrade_to_neutral_defaults() {
    assert_eq!(parse_readiness_level("7"), 7);
    assert_eq!(parse_readiness_level("3: prototype; 5: pilot"), 5);
    assert_eq!(parse_readiness_level("not assessed"), 0);
    assert_eq!(parse_readiness_level(""), 0);
    assert_eq!(parse_money("1 234,5"), 1234.5);
    assert_eq!(parse_money("-500"), -500.0);
    assert_eq!(parse_money("н/д"), 0.0);
    assert_eq!(parse_money("garbage"), 0.0);
}

#[test]
fn empty_record_gets_floor_labels() {
    let labels = label_record(&RawRecord::default());
    assert_eq!(labels.tech_maturity, 1.0);
    assert_eq!(labels.team_readiness, 3.0);
    assert_eq!(labels.financial_health, 2.0);
    assert_eq!(labels.innovation, 1.0);
    assert_eq!(labels.market_potential, 1.0);
}

#[test]
fn patents_raise_innovation_by_tier() {
    let none = score_innovation(3, 0, false, 0);
    assert_eq!(score_innovation(3, 1, false, 0) - none, 1.0);
    assert_eq!(score_innovation(3, 5, false, 0) - none, 2.0);
    assert_eq!(score_innovation(3, 12, false, 0) - none, 2.5);
}

#[test]
fn labelling_is_idempotent_and_bounded() {
    for record in synthetic_records(40) {
        let a = label_record(&record);
        let b = label_record(&record);
        assert_eq!(a, b);
        for target in Target::ALL {
            let score = a.get(target);
            assert!((1.0..=10.0).contains(&score), "{} = {}", target, score);
        }
    }
}

// ---------------------------------------------------------------------------
// Feature extraction
// ---------------------------------------------------------------------------

#[test]
fn extraction_is_pure_and_fixed_width() {
    let extractor = FeatureExtractor::default();
    assert_eq!(extractor.feature_names().len(), FEATURE_COUNT);
    let record = synthetic_record(7);
    let a = extractor.extract(&record);
    assert_eq!(a.len(), FEATURE_COUNT);
    assert_eq!(a, extractor.extract(&record));
    assert!(a.iter().all(|v| v.is_finite()));

    let empty = extractor.extract(&RawRecord::default());
    assert_eq!(empty.len(), FEATURE_COUNT);
    assert!(extractor.try_extract(&RawRecord::default()).is_err());
}

// ---------------------------------------------------------------------------
// Training and serving
// ---------------------------------------------------------------------------

#[test]
fn multi_target_training_writes_artifacts_and_summary() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let (_, summary) = train_into(&config, 60);

    assert!(summary.failed.is_empty());
    assert_eq!(summary.targets.len(), 6);
    assert_eq!(summary.n_features, FEATURE_COUNT);

    let summary_json = fs::read_to_string(dir.path().join(TRAINING_SUMMARY_FILE)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&summary_json).unwrap();
    assert_eq!(value["engine"], "gbdt");

    let store = ModelStore::new(dir.path());
    for target in Target::ALL {
        assert!(store.model_path(target, LATEST).is_file());
        let meta = store.latest_metadata(target).unwrap().unwrap();
        assert_eq!(meta.feature_names, FeatureExtractor::default().feature_names());
        assert_eq!(meta.cv_metrics.n_folds, 3);
        assert!(summary.targets[&target].top_features.len() <= 5);
    }
}

#[test]
fn predictions_are_clamped_and_batch_matches_single() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    train_into(&config, 60);

    let handle = PredictorHandle::from_config(&config);
    let predictor = handle.get();
    assert!(predictor.is_ready());
    assert!(predictor.version().is_some());

    let mut records = synthetic_records(25);
    records.push(RawRecord::default());
    let mut extreme = synthetic_record(3);
    extreme.set_field("revenue_2024", Some("999999999999999".to_string()));
    extreme.set_field("trl", Some("9".to_string()));
    records.push(extreme);

    let batch = predictor.predict_batch(&records);
    assert_eq!(batch.len(), records.len());
    for (record, scores) in records.iter().zip(&batch) {
        let single = predictor.predict(record);
        assert_eq!(&single, scores);
        assert_eq!(single.len(), 6);
        for (&target, &score) in &single {
            assert!(
                (MIN_SCORE..=MAX_SCORE).contains(&score),
                "{} scored {}",
                target,
                score
            );
        }
    }
}

#[test]
fn explanations_are_split_and_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    train_into(&config, 60);
    let predictor = PredictorHandle::from_config(&config).get();

    let record = synthetic_record(11);
    let explanation = predictor.explain(&record, Target::Overall, 4).unwrap();
    assert!(explanation.top_positive.len() <= 4);
    assert!(explanation.top_negative.len() <= 4);
    assert!(explanation.top_positive.iter().all(|c| c.contribution > 0.0));
    assert!(explanation.top_negative.iter().all(|c| c.contribution < 0.0));
    for pair in explanation.top_positive.windows(2) {
        assert!(pair[0].contribution.abs() >= pair[1].contribution.abs());
    }
    assert_eq!(explanation.predicted_score, predictor.predict(&record)[&Target::Overall]);

    let all = predictor.explain_all(&record, 3);
    assert_eq!(all.len(), 6);
}

#[test]
fn missing_target_scores_zero_but_service_stays_ready() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    train_into(&config, 40);
    fs::remove_dir_all(dir.path().join(Target::FinancialHealth.as_str())).unwrap();

    let predictor = ScorePredictor::load(&ModelStore::new(dir.path()), FeatureExtractor::default());
    assert!(predictor.is_ready());
    assert_eq!(predictor.loaded_targets().len(), 5);
    let scores = predictor.predict(&synthetic_record(2));
    assert_eq!(scores[&Target::FinancialHealth], 0.0);
    assert!(scores[&Target::Overall] >= MIN_SCORE);
    assert!(predictor.explain(&synthetic_record(2), Target::FinancialHealth, 5).is_none());
}

#[test]
fn restore_repoints_served_version() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let (_, first) = train_into(&config, 40);
    let (_, second) = train_into(&config, 40);

    let store = ModelStore::new(dir.path());
    let first_version = first.targets[&Target::Overall].version.clone();
    assert_eq!(store.versions(Target::Overall).unwrap().len(), 2);

    let handle = PredictorHandle::from_config(&config);
    assert_eq!(
        handle.get().version(),
        Some(second.targets[&Target::Overall].version.as_str())
    );

    store.restore(Target::Overall, &first_version).unwrap();
    handle.reset();
    assert_eq!(handle.get().version(), Some(first_version.as_str()));
}
