use std::env;

use anyhow::Result;

use startup_scoring::io::{read_external_jsonl, read_records_csv};
use startup_scoring::logging::init_logging;
use startup_scoring::reliability::ReliabilityEngine;
use startup_scoring::{retrain, FeatureExtractor, GroundTruth, ScoringConfig};

fn main() -> Result<()> {
    init_logging();

    let mut args = env::args().skip(1);
    let csv_path = args.next().unwrap_or_else(|| "data/startups.csv".to_string());
    let jsonl_path = args.next().unwrap_or_else(|| "data/external.jsonl".to_string());
    let config = ScoringConfig::default();

    let records = read_records_csv(&csv_path)?;
    let mut external = read_external_jsonl(&jsonl_path)?;
    if external.is_empty() {
        println!("No external records in {}", jsonl_path);
        return Ok(());
    }

    let mut reliability = ReliabilityEngine::new(&records);
    reliability.compute_all(&external);
    reliability.annotate(&mut external);

    let extractor = FeatureExtractor::new(config.reference_year);
    let data = GroundTruth::from_records(&records, &extractor);
    let outcome = retrain(&data, &external, &config)?;

    println!("Status:   {}", outcome.status);
    println!("Reason:   {}", outcome.reason);
    println!("Ground truth: {}", outcome.n_ground_truth);
    println!("External (extracted/used): {}/{}", outcome.n_external, outcome.n_external_used);
    for (target, before) in &outcome.before {
        match outcome.after.get(target) {
            Some(after) => println!(
                "{:<18} R2 {:.4} -> {:.4}  MAE {:.4} -> {:.4}",
                target, before.r2, after.r2, before.mae, after.mae
            ),
            None => println!("{:<18} R2 {:.4}  MAE {:.4}", target, before.r2, before.mae),
        }
    }
    Ok(())
}
