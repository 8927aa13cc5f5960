//! Per-source reliability from overlap with the labelled dataset.
//!
//! For every source, companies present in both the ground truth and the
//! source (matched by INN) are compared field by field. The reliability of a
//! field is `1 - mean normalized absolute error`; `overall` is the mean over
//! fields. Unknown sources or fields score 0.5.
use std::collections::{BTreeMap, HashMap};

use crate::metrics::round4;
use crate::record::{parse_founding_year, try_parse_money, ExternalRecord, RawRecord, REPORT_YEARS};

pub const DEFAULT_RELIABILITY: f64 = 0.5;
pub const OVERALL: &str = "overall";

/// INNs shorter than this are not trusted as join keys.
const MIN_INN_LEN: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct ReliabilityEngine {
    by_inn: HashMap<String, RawRecord>,
    scores: BTreeMap<String, BTreeMap<String, f64>>,
}

impl ReliabilityEngine {
    pub fn new(ground_truth: &[RawRecord]) -> Self {
        let by_inn: HashMap<String, RawRecord> = ground_truth
            .iter()
            .filter_map(|r| inn_key(r).map(|inn| (inn, r.clone())))
            .collect();
        log::info!("Reliability engine indexed {} companies by INN", by_inn.len());
        Self {
            by_inn,
            scores: BTreeMap::new(),
        }
    }

    /// Score one source from its records. Records without a ground-truth match are ignored.
    pub fn compute_for_source(&mut self, source: &str, records: &[&RawRecord]) -> BTreeMap<String, f64> {
        let mut errors: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for external in records {
            let truth = match inn_key(external).and_then(|inn| self.by_inn.get(&inn)) {
                Some(truth) => truth,
                None => continue,
            };
            for (field, t, e) in field_comparisons(truth, external) {
                errors.entry(field).or_default().push(normalized_error(t, e));
            }
        }

        let mut reliability: BTreeMap<String, f64> = errors
            .iter()
            .map(|(field, errs)| {
                let mean = errs.iter().sum::<f64>() / errs.len() as f64;
                log::debug!(
                    "{}/{}: reliability {:.3} over {} samples",
                    source,
                    field,
                    1.0 - mean,
                    errs.len()
                );
                (field.clone(), round4(1.0 - mean))
            })
            .collect();
        if !reliability.is_empty() {
            let overall = reliability.values().sum::<f64>() / reliability.len() as f64;
            reliability.insert(OVERALL.to_string(), round4(overall));
        }
        log::info!(
            "Source '{}' reliability: {:.3} ({} fields)",
            source,
            reliability.get(OVERALL).copied().unwrap_or(DEFAULT_RELIABILITY),
            reliability.len().saturating_sub(1)
        );
        self.scores.insert(source.to_string(), reliability.clone());
        reliability
    }

    /// Group external records by source and score each source.
    pub fn compute_all(&mut self, external: &[ExternalRecord]) {
        let mut by_source: BTreeMap<&str, Vec<&RawRecord>> = BTreeMap::new();
        for e in external {
            if let Some(source) = e.source.as_deref() {
                by_source.entry(source).or_default().push(&e.record);
            }
        }
        for (source, records) in by_source {
            self.compute_for_source(source, &records);
        }
    }

    pub fn get_reliability(&self, source: &str, field: &str) -> f64 {
        self.scores
            .get(source)
            .and_then(|fields| fields.get(field))
            .copied()
            .unwrap_or(DEFAULT_RELIABILITY)
    }

    pub fn scores(&self) -> &BTreeMap<String, BTreeMap<String, f64>> {
        &self.scores
    }

    /// Fill `source_reliability` with the overall score of each record's source.
    /// Records without a source are left as they are.
    pub fn annotate(&self, external: &mut [ExternalRecord]) {
        for e in external.iter_mut() {
            if let Some(source) = e.source.as_deref() {
                e.source_reliability = Some(self.get_reliability(source, OVERALL));
            }
        }
    }
}

fn inn_key(record: &RawRecord) -> Option<String> {
    let inn = record.inn.as_deref()?.trim();
    (inn.chars().count() >= MIN_INN_LEN).then(|| inn.to_string())
}

/// `min(1, |t - e| / |t|)`, with both-zero counting as exact and zero truth as a full miss.
pub fn normalized_error(truth: f64, external: f64) -> f64 {
    if truth == 0.0 && external == 0.0 {
        0.0
    } else if truth == 0.0 {
        1.0
    } else {
        ((truth - external).abs() / truth.abs()).min(1.0)
    }
}

/// Strict numeric reading: `None` for missing fields, blanks and markers.
fn numeric(value: &Option<String>) -> Option<f64> {
    value.as_deref().and_then(try_parse_money)
}

fn field_comparisons(truth: &RawRecord, external: &RawRecord) -> Vec<(String, f64, f64)> {
    let mut out = Vec::new();
    for (idx, year) in REPORT_YEARS.iter().enumerate() {
        if let (Some(t), Some(e)) = (numeric(&truth.revenue[idx]), numeric(&external.revenue[idx])) {
            out.push((format!("revenue_{}", year), t, e));
        }
        if let (Some(t), Some(e)) = (numeric(&truth.profit[idx]), numeric(&external.profit[idx])) {
            out.push((format!("profit_{}", year), t, e));
        }
    }
    let founded = |r: &RawRecord| parse_founding_year(r.year_founded.as_deref().unwrap_or(""));
    if let (Some(t), Some(e)) = (founded(truth), founded(external)) {
        out.push(("year_founded".to_string(), t as f64, e as f64));
    }
    out
}
