use std::env;

use anyhow::Result;

use startup_scoring::io::write_labeled_csv;
use startup_scoring::labeler::{label_records, score_distribution};
use startup_scoring::logging::init_logging;
use startup_scoring::{GroundTruth, ModelStore, ModelTrainer, ScoringConfig};

fn main() -> Result<()> {
    init_logging();

    let csv_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "data/startups.csv".to_string());
    let config = ScoringConfig::default();

    let records = startup_scoring::io::read_records_csv(&csv_path)?;
    let labeled = label_records(&records);
    for (target, stats) in score_distribution(&labeled) {
        println!(
            "{:<18} mean={:.2} min={:.2} max={:.2}",
            target, stats.mean, stats.min, stats.max
        );
    }
    let labeled_path = config.model_dir.join("labeled.csv");
    std::fs::create_dir_all(&config.model_dir)?;
    write_labeled_csv(&labeled_path, &labeled)?;

    let extractor = startup_scoring::FeatureExtractor::new(config.reference_year);
    let data = GroundTruth::from_records(&records, &extractor);
    let store = ModelStore::new(config.model_dir.clone());
    let summary = ModelTrainer::from_config(&config).train_multi_target(&data, &store)?;

    println!("\nTrained {} targets on {} samples", summary.targets.len(), summary.n_samples);
    for (target, t) in &summary.targets {
        println!(
            "{:<18} v{}  R2={:.4} MAE={:.4}",
            target, t.version, t.cv_metrics.r2, t.cv_metrics.mae
        );
    }
    for (target, err) in &summary.failed {
        println!("{:<18} FAILED: {}", target, err);
    }
    Ok(())
}
