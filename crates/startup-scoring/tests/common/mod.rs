#![allow(dead_code)]

use std::path::Path;

use startup_scoring::config::{ModelConfig, ModelType, ScoringConfig};
use startup_scoring::features::TOP_CLUSTERS;
use startup_scoring::trainer::TrainingSummary;
use startup_scoring::{FeatureExtractor, GroundTruth, ModelStore, ModelTrainer, RawRecord};

pub fn small_model() -> ModelConfig {
    ModelConfig {
        learning_rate: 0.3,
        model_type: ModelType::GBDT {
            n_estimators: 40,
            max_depth: 3,
            subsample: 1.0,
            colsample_bytree: 1.0,
            reg_alpha: 0.0,
            reg_lambda: 1.0,
            min_child_weight: 1.0,
            max_bins: 64,
            seed: 42,
        },
    }
}

pub fn config_for(dir: &Path) -> ScoringConfig {
    ScoringConfig {
        model_dir: dir.to_path_buf(),
        n_folds: 3,
        model: small_model(),
        ..ScoringConfig::default()
    }
}

fn list(prefix: &str, i: usize, n: usize) -> Option<String> {
    let items: Vec<String> = (0..n).map(|k| format!("{} {}-{}", prefix, i, k)).collect();
    Some(items.join("; "))
}

/// Deterministic, varied company profile.
pub fn synthetic_record(i: usize) -> RawRecord {
    let mut r = RawRecord::default();
    r.set_field("name", Some(format!("Startup {}", i)));
    r.set_field("trl", Some(((i % 9) + 1).to_string()));
    r.set_field("irl", Some((((i / 2) % 9) + 1).to_string()));
    r.set_field("mrl", Some((((i / 3) % 9) + 1).to_string()));
    r.set_field("crl", Some((((i * 7) % 9) + 1).to_string()));
    r.set_field("patents", list("RU", i, i % 6));
    r.set_field("technologies", list("tech", i, i % 4));
    r.set_field("industries", list("industry", i, (i / 5) % 3 + 1));
    r.set_field("product_names", list("product", i, i % 3));
    r.set_field("cluster", Some(TOP_CLUSTERS[i % TOP_CLUSTERS.len()].0.to_string()));
    r.set_field("status", Some("Действующий участник".to_string()));
    r.set_field("year_founded", Some((2010 + i % 12).to_string()));
    if i % 4 == 0 {
        r.set_field(
            "company_description",
            Some("Platform built on machine learning".to_string()),
        );
    } else {
        r.set_field("company_description", Some("Industrial equipment".to_string()));
    }
    if i % 3 != 0 {
        r.set_field("revenue_2024", Some((i * 250_000).to_string()));
        r.set_field("revenue_2023", Some((i * 200_000).to_string()));
        r.set_field("revenue_2022", Some((i * 150_000).to_string()));
        r.set_field("profit_2024", Some((i * 20_000).to_string()));
    }
    r
}

pub fn synthetic_records(n: usize) -> Vec<RawRecord> {
    (0..n).map(synthetic_record).collect()
}

/// Train all targets on `n` synthetic records into `config.model_dir`.
pub fn train_into(config: &ScoringConfig, n: usize) -> (GroundTruth, TrainingSummary) {
    let extractor = FeatureExtractor::new(config.reference_year);
    let data = GroundTruth::from_records(&synthetic_records(n), &extractor);
    let store = ModelStore::new(config.model_dir.clone());
    let summary = ModelTrainer::from_config(config)
        .train_multi_target(&data, &store)
        .unwrap();
    (data, summary)
}
