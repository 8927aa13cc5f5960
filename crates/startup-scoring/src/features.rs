//! Fixed-order numeric feature vectors.
//!
//! The order of [`FeatureExtractor::feature_names`] is part of every stored
//! model: artifacts carry the list they were trained on and the predictor
//! refuses to run a model whose list differs.
use anyhow::Result;
use statrs::statistics::Statistics;

use crate::error::ScoringError;
use crate::math::Array2;
use crate::record::{RawRecord, REPORT_YEARS};

/// Clusters that get their own one-hot column, with the column suffix used for each.
pub const TOP_CLUSTERS: [(&str, &str); 5] = [
    ("IT-кластер", "it"),
    ("Биомед", "biomed"),
    ("Энерготех", "energy"),
    ("Космос", "space"),
    ("Ядерные технологии", "nuclear"),
];

/// Membership status lookup. Unknown statuses encode as [`DEFAULT_STATUS_CODE`].
pub const STATUS_MAP: [(&str, f32); 5] = [
    ("Действующий участник", 3.0),
    ("Утвердить статус", 2.0),
    ("Присвоен статус", 2.0),
    ("Выбыл", 0.0),
    ("На рассмотрении", 1.0),
];

pub const DEFAULT_STATUS_CODE: f32 = 1.0;

pub const FEATURE_COUNT: usize = 39;

/// `sign(x) * ln(1 + |x|)`, keeps losses negative.
pub fn signed_log1p(x: f64) -> f64 {
    x.signum() * x.abs().ln_1p()
}

/// Converts records into feature vectors. The only state is the year used
/// to compute company age.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureExtractor {
    pub reference_year: i32,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self {
            reference_year: 2026,
        }
    }
}

impl FeatureExtractor {
    pub fn new(reference_year: i32) -> Self {
        Self { reference_year }
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(FEATURE_COUNT);
        for year in REPORT_YEARS {
            names.push(format!("log_revenue_{}", year));
        }
        for year in REPORT_YEARS {
            names.push(format!("log_profit_{}", year));
        }
        names.extend(
            [
                "max_revenue_log",
                "max_profit_log",
                "revenue_trend",
                "profit_margin",
                "revenue_stability",
                "years_with_revenue",
                "trl",
                "irl",
                "mrl",
                "crl",
                "patent_count",
                "tech_count",
                "has_ai",
                "product_count",
                "industry_count",
                "project_count",
                "has_revenue",
                "company_age",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        for (_, suffix) in TOP_CLUSTERS {
            names.push(format!("cluster_{}", suffix));
        }
        names.push("status_encoded".to_string());
        names.push("len_company_desc".to_string());
        names.push("len_product_desc".to_string());
        names.push("len_technologies".to_string());
        names
    }

    /// Extract the feature vector of one record. Never fails: missing or
    /// malformed fields contribute zeros and non-finite values are zeroed.
    pub fn extract(&self, record: &RawRecord) -> Vec<f32> {
        let revenues = record.revenues();
        let profits = record.profits();
        let levels = record.readiness_levels();

        let mut features: Vec<f64> = Vec::with_capacity(FEATURE_COUNT);
        features.extend(revenues.iter().map(|&r| signed_log1p(r)));
        features.extend(profits.iter().map(|&p| signed_log1p(p)));

        let max_revenue = revenues.iter().copied().fold(f64::MIN, f64::max);
        let max_profit = profits.iter().copied().fold(f64::MIN, f64::max);
        features.push(signed_log1p(max_revenue));
        features.push(signed_log1p(max_profit));
        features.push(revenue_trend(&revenues));
        features.push(profit_margin(&revenues, &profits));
        features.push(revenue_stability(&revenues));
        let years_with_revenue = revenues.iter().filter(|&&r| r > 0.0).count();
        features.push(years_with_revenue as f64);

        features.push(levels.trl as f64);
        features.push(levels.irl as f64);
        features.push(levels.mrl as f64);
        features.push(levels.crl as f64);
        features.push(record.patent_count() as f64);
        features.push(record.technology_count() as f64);
        features.push(flag(record.has_ai()));
        features.push(record.product_count() as f64);

        features.push(record.industry_count() as f64);
        features.push(record.project_count() as f64);
        features.push(flag(years_with_revenue > 0));
        features.push(record.company_age(self.reference_year) as f64);

        let cluster = record.cluster.as_deref().unwrap_or("").trim();
        for (name, _) in TOP_CLUSTERS {
            features.push(flag(cluster == name));
        }
        features.push(status_code(record.status.as_deref().unwrap_or("")) as f64);

        for text in [
            &record.company_description,
            &record.product_description,
            &record.technologies,
        ] {
            let len = text.as_deref().map(|t| t.chars().count()).unwrap_or(0);
            features.push((len as f64).ln_1p());
        }

        debug_assert_eq!(features.len(), FEATURE_COUNT);
        features
            .into_iter()
            .map(|v| if v.is_finite() { v as f32 } else { 0.0 })
            .collect()
    }

    /// Like [`extract`](Self::extract) but rejects records without any populated field.
    pub fn try_extract(&self, record: &RawRecord) -> Result<Vec<f32>> {
        if record.is_empty() {
            return Err(ScoringError::EmptyRecord.into());
        }
        Ok(self.extract(record))
    }

    /// Feature matrix with one row per record, in input order.
    pub fn extract_batch(&self, records: &[RawRecord]) -> Array2<f32> {
        let mut matrix = Array2::empty(FEATURE_COUNT);
        for record in records {
            let row = self.extract(record);
            // rows always have FEATURE_COUNT entries
            if let Err(e) = matrix.push_row(&row) {
                log::error!("Dropping malformed feature row: {}", e);
            }
        }
        matrix
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

pub fn status_code(status: &str) -> f32 {
    let status = status.trim();
    STATUS_MAP
        .iter()
        .find(|(name, _)| *name == status)
        .map(|(_, code)| *code)
        .unwrap_or(DEFAULT_STATUS_CODE)
}

/// Positive revenues, oldest year first.
fn chronological_positive(revenues: &[f64]) -> Vec<f64> {
    revenues.iter().rev().copied().filter(|&r| r > 0.0).collect()
}

/// Sum of the later half over the sum of the earlier half of positive revenues.
fn revenue_trend(revenues: &[f64]) -> f64 {
    let series = chronological_positive(revenues);
    if series.len() < 2 {
        return 0.0;
    }
    let mid = series.len() / 2;
    let earlier: f64 = series[..mid].iter().sum();
    let later: f64 = series[mid..].iter().sum();
    if earlier == 0.0 {
        return 0.0;
    }
    later / earlier
}

fn profit_margin(revenues: &[f64], profits: &[f64]) -> f64 {
    let margins: Vec<f64> = revenues
        .iter()
        .zip(profits)
        .filter(|(&r, _)| r > 0.0)
        .map(|(&r, &p)| p / r)
        .collect();
    if margins.is_empty() {
        return 0.0;
    }
    margins.iter().mean()
}

/// Coefficient of variation of the positive revenues.
fn revenue_stability(revenues: &[f64]) -> f64 {
    let series = chronological_positive(revenues);
    if series.len() < 2 {
        return 0.0;
    }
    let mean = series.iter().mean();
    if mean == 0.0 {
        return 0.0;
    }
    series.iter().population_std_dev() / mean
}
