//! Proxy labelling: six 1-10 scores derived from structural record fields.
//!
//! These heuristics stand in for expert ratings when training the models.
//! Everything here is a pure function of the [`RawRecord`].
use std::collections::BTreeMap;

use serde::Serialize;
use statrs::statistics::Statistics;

use crate::record::{RawRecord, ReadinessLevels};
use crate::target::Target;

pub use crate::record::{parse_money, parse_readiness_level};

/// Bump when any formula below changes; stored labels are only comparable
/// within one formula version.
pub const LABEL_FORMULA_VERSION: u32 = 1;

/// Score returned by the team heuristic when CRL is unknown. Other
/// dimensions map "unknown" to 1.0; this one intentionally does not.
pub const UNKNOWN_TEAM_SCORE: f64 = 3.0;

/// Six proxy scores for one record, each in [1, 10].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProxyLabels {
    pub overall: f64,
    pub tech_maturity: f64,
    pub innovation: f64,
    pub market_potential: f64,
    pub team_readiness: f64,
    pub financial_health: f64,
}

impl ProxyLabels {
    pub fn get(&self, target: Target) -> f64 {
        match target {
            Target::Overall => self.overall,
            Target::TechMaturity => self.tech_maturity,
            Target::Innovation => self.innovation,
            Target::MarketPotential => self.market_potential,
            Target::TeamReadiness => self.team_readiness,
            Target::FinancialHealth => self.financial_health,
        }
    }
}

/// A record's proxy labels together with the parsed signals behind them.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRecord {
    pub id: String,
    pub name: String,
    pub inn: String,
    pub cluster: String,
    pub status: String,
    pub year_founded: String,
    pub levels: ReadinessLevels,
    pub patent_count: usize,
    pub has_ai: bool,
    pub tech_count: usize,
    pub industry_count: usize,
    pub product_count: usize,
    pub max_revenue: f64,
    pub max_profit: f64,
    pub labels: ProxyLabels,
}

/// Mean / min / max of one target over a labelled dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

fn clamp_score(value: f64) -> f64 {
    value.clamp(1.0, 10.0)
}

/// Weighted mean of the known readiness levels, rescaled from 0-9 to 1-10.
/// Levels equal to 0 are unknown and left out; all unknown gives 1.0.
pub fn score_tech_maturity(levels: ReadinessLevels) -> f64 {
    let weighted = [
        (levels.trl, 0.35),
        (levels.irl, 0.25),
        (levels.mrl, 0.25),
        (levels.crl, 0.15),
    ];
    let known: Vec<(f64, f64)> = weighted
        .iter()
        .filter(|(level, _)| *level > 0)
        .map(|&(level, w)| (level as f64, w))
        .collect();
    if known.is_empty() {
        return 1.0;
    }
    let total_weight: f64 = known.iter().map(|(_, w)| w).sum();
    let avg = known.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight;
    clamp_score(avg * 10.0 / 9.0)
}

pub fn score_innovation(trl: u8, patent_count: usize, has_ai: bool, tech_count: usize) -> f64 {
    let mut score = 1.0;
    score += (trl as f64 / 3.0).min(3.0);
    score += match patent_count {
        n if n >= 10 => 2.5,
        n if n >= 5 => 2.0,
        n if n >= 1 => 1.0,
        _ => 0.0,
    };
    if has_ai {
        score += 1.5;
    }
    score += (tech_count as f64 * 0.4).min(2.0);
    clamp_score(score)
}

pub fn score_market_potential(
    irl: u8,
    industry_count: usize,
    product_count: usize,
    has_revenue: bool,
) -> f64 {
    let mut score = 1.0;
    score += (irl as f64).min(4.0);
    score += (industry_count as f64 * 0.5).min(2.0);
    score += (product_count as f64 * 0.3).min(1.5);
    if has_revenue {
        score += 1.5;
    }
    clamp_score(score)
}

pub fn score_team_readiness(crl: u8) -> f64 {
    if crl == 0 {
        return UNKNOWN_TEAM_SCORE;
    }
    clamp_score(crl as f64 * 10.0 / 9.0)
}

/// Financial health from up to six years of revenue and profit.
///
/// Both slices are aligned with `REPORT_YEARS` (newest first); the trend bonus
/// compares older against more recent non-zero revenues.
pub fn score_financial_health(revenues: &[f64], profits: &[f64]) -> f64 {
    let rev_nonzero: Vec<f64> = revenues.iter().rev().copied().filter(|&r| r > 0.0).collect();
    let prof_nonzero: Vec<f64> = profits.iter().copied().filter(|&p| p > 0.0).collect();

    if rev_nonzero.is_empty() && prof_nonzero.is_empty() {
        return 2.0;
    }

    let mut score = 2.0;
    let data_years = rev_nonzero.len().max(prof_nonzero.len());
    score += (data_years as f64 * 0.2).min(1.0);

    if !rev_nonzero.is_empty() {
        let max_rev = rev_nonzero.iter().copied().fold(f64::MIN, f64::max);
        score += match max_rev {
            r if r >= 100_000_000.0 => 3.0,
            r if r >= 10_000_000.0 => 2.0,
            r if r >= 1_000_000.0 => 1.0,
            _ => 0.5,
        };
    }

    if !prof_nonzero.is_empty() {
        let max_prof = prof_nonzero.iter().copied().fold(f64::MIN, f64::max);
        score += match max_prof {
            p if p >= 50_000_000.0 => 2.0,
            p if p >= 5_000_000.0 => 1.5,
            p if p >= 500_000.0 => 1.0,
            _ => 0.3,
        };
    }

    if rev_nonzero.len() >= 3 {
        let mid = rev_nonzero.len() / 2;
        let earlier = rev_nonzero[..mid].iter().sum::<f64>() / mid as f64;
        let later = rev_nonzero[mid..].iter().sum::<f64>() / (rev_nonzero.len() - mid) as f64;
        if earlier > 0.0 {
            let ratio = later / earlier;
            if ratio > 1.3 {
                score += 2.0;
            } else if ratio >= 1.0 {
                score += 1.0;
            }
        }
    }

    clamp_score(score)
}

pub fn score_overall(tech: f64, innovation: f64, market: f64, team: f64, financial: f64) -> f64 {
    clamp_score(tech * 0.25 + innovation * 0.20 + market * 0.20 + team * 0.15 + financial * 0.20)
}

/// Compute the six proxy labels for one record.
pub fn label_record(record: &RawRecord) -> ProxyLabels {
    let levels = record.readiness_levels();
    let revenues = record.revenues();
    let profits = record.profits();
    let has_revenue = revenues.iter().any(|&r| r > 0.0);

    let tech_maturity = score_tech_maturity(levels);
    let innovation = score_innovation(
        levels.trl,
        record.patent_count(),
        record.has_ai(),
        record.technology_count(),
    );
    let market_potential = score_market_potential(
        levels.irl,
        record.industry_count(),
        record.product_count(),
        has_revenue,
    );
    let team_readiness = score_team_readiness(levels.crl);
    let financial_health = score_financial_health(&revenues, &profits);
    let overall = score_overall(
        tech_maturity,
        innovation,
        market_potential,
        team_readiness,
        financial_health,
    );

    ProxyLabels {
        overall,
        tech_maturity,
        innovation,
        market_potential,
        team_readiness,
        financial_health,
    }
}

/// Label every record, keeping the parsed signals for export and auditing.
pub fn label_records(records: &[RawRecord]) -> Vec<LabeledRecord> {
    records
        .iter()
        .map(|record| {
            let revenues = record.revenues();
            let profits = record.profits();
            LabeledRecord {
                id: record.record_id(),
                name: record.name.clone().unwrap_or_default(),
                inn: record.inn.clone().unwrap_or_default(),
                cluster: record.cluster.clone().unwrap_or_default(),
                status: record.status.clone().unwrap_or_default(),
                year_founded: record.year_founded.clone().unwrap_or_default(),
                levels: record.readiness_levels(),
                patent_count: record.patent_count(),
                has_ai: record.has_ai(),
                tech_count: record.technology_count(),
                industry_count: record.industry_count(),
                product_count: record.product_count(),
                max_revenue: revenues.iter().copied().fold(f64::MIN, f64::max),
                max_profit: profits.iter().copied().fold(f64::MIN, f64::max),
                labels: label_record(record),
            }
        })
        .collect()
}

/// Per-target mean/min/max over a labelled dataset. Empty input gives an empty map.
pub fn score_distribution(labeled: &[LabeledRecord]) -> BTreeMap<Target, ScoreStats> {
    let mut out = BTreeMap::new();
    if labeled.is_empty() {
        return out;
    }
    for target in Target::ALL {
        let values: Vec<f64> = labeled.iter().map(|r| r.labels.get(target)).collect();
        out.insert(
            target,
            ScoreStats {
                mean: values.iter().mean(),
                min: Statistics::min(values.iter()),
                max: Statistics::max(values.iter()),
            },
        );
    }
    out
}
