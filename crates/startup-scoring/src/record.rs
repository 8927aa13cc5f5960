//! Company profile records and the total parsers that read them.
//!
//! Every field of a [`RawRecord`] is optional. Parsers in this module never
//! fail: malformed input degrades to a neutral default (`0`, `0.0`, `false`).
use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Reporting years, newest first. This is also the order of the per-year features.
pub const REPORT_YEARS: [i32; 6] = [2025, 2024, 2023, 2022, 2021, 2020];

/// Founding years outside this window are treated as unparseable.
pub const FOUNDING_YEAR_RANGE: (i32, i32) = (1900, 2030);

/// Lower-cased keywords that mark AI-related work.
pub const AI_KEYWORDS: &[&str] = &[
    "искусственный интеллект",
    "нейросеть",
    "машинное обучение",
    "deep learning",
    "нейронная сеть",
    "ai",
    "ml",
    "natural language processing",
    "computer vision",
    "nlp",
    "генеративный",
    "llm",
    "gpt",
    "neural network",
    "трансформер",
    "transformer",
];

static LEVEL_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|;\s*)([0-9])\s*:").expect("valid level regex"));

/// One company profile as delivered by the dataset or an external collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RecordFields", into = "RecordFields")]
pub struct RawRecord {
    pub name: Option<String>,
    pub company_description: Option<String>,
    pub project_description: Option<String>,
    pub product_description: Option<String>,
    /// Semicolon-delimited technology tags.
    pub technologies: Option<String>,
    /// Semicolon-delimited industry tags.
    pub industries: Option<String>,
    pub product_names: Option<String>,
    pub project_names: Option<String>,
    /// Semicolon-delimited patent entries.
    pub patents: Option<String>,
    pub cluster: Option<String>,
    pub status: Option<String>,
    pub year_founded: Option<String>,
    pub trl_raw: Option<String>,
    pub irl_raw: Option<String>,
    pub mrl_raw: Option<String>,
    pub crl_raw: Option<String>,
    /// Revenue per year, aligned with [`REPORT_YEARS`].
    pub revenue: [Option<String>; 6],
    /// Profit per year, aligned with [`REPORT_YEARS`].
    pub profit: [Option<String>; 6],
    pub inn: Option<String>,
    pub ogrn: Option<String>,
    pub website: Option<String>,
    pub full_legal_name: Option<String>,
    pub category: Option<String>,
    pub region: Option<String>,
}

/// A record observed outside the labelled dataset, awaiting pseudo-labelling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub record: RawRecord,
    /// Collector that produced the record (registry, news feed, ...).
    #[serde(default)]
    pub source: Option<String>,
    /// Reliability of `source` in [0, 1]. `None` leaves the sample weight unscaled.
    #[serde(default)]
    pub source_reliability: Option<f64>,
}

impl ExternalRecord {
    pub fn new(record: RawRecord) -> Self {
        Self {
            record,
            source: None,
            source_reliability: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// The four readiness levels of a record, each in 0..=9 (0 = unknown).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessLevels {
    pub trl: u8,
    pub irl: u8,
    pub mrl: u8,
    pub crl: u8,
}

impl RawRecord {
    /// Assign a field by its logical name (or a known alias). Returns false for
    /// names the record does not carry.
    pub fn set_field(&mut self, key: &str, value: Option<String>) -> bool {
        let value = value.filter(|v| !v.trim().is_empty());
        let key = key.trim().to_ascii_lowercase();
        if let Some(year) = key.strip_prefix("revenue_") {
            return match year_slot(year) {
                Some(idx) => {
                    self.revenue[idx] = value;
                    true
                }
                None => false,
            };
        }
        if let Some(year) = key.strip_prefix("profit_") {
            return match year_slot(year) {
                Some(idx) => {
                    self.profit[idx] = value;
                    true
                }
                None => false,
            };
        }
        let slot = match key.as_str() {
            "name" => &mut self.name,
            "company_description" => &mut self.company_description,
            "project_description" | "description" => &mut self.project_description,
            "product_description" => &mut self.product_description,
            "technologies" => &mut self.technologies,
            "industries" => &mut self.industries,
            "product_names" => &mut self.product_names,
            "project_names" => &mut self.project_names,
            "patents" => &mut self.patents,
            "cluster" => &mut self.cluster,
            "status" => &mut self.status,
            "year_founded" | "year" => &mut self.year_founded,
            "trl_raw" | "trl" => &mut self.trl_raw,
            "irl_raw" | "irl" => &mut self.irl_raw,
            "mrl_raw" | "mrl" => &mut self.mrl_raw,
            "crl_raw" | "crl" => &mut self.crl_raw,
            "inn" => &mut self.inn,
            "ogrn" => &mut self.ogrn,
            "website" => &mut self.website,
            "full_legal_name" => &mut self.full_legal_name,
            "category" => &mut self.category,
            "region" => &mut self.region,
            _ => return false,
        };
        *slot = value;
        true
    }

    /// All populated fields keyed by their logical name.
    pub fn fields(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let named = [
            ("name", &self.name),
            ("company_description", &self.company_description),
            ("project_description", &self.project_description),
            ("product_description", &self.product_description),
            ("technologies", &self.technologies),
            ("industries", &self.industries),
            ("product_names", &self.product_names),
            ("project_names", &self.project_names),
            ("patents", &self.patents),
            ("cluster", &self.cluster),
            ("status", &self.status),
            ("year_founded", &self.year_founded),
            ("trl_raw", &self.trl_raw),
            ("irl_raw", &self.irl_raw),
            ("mrl_raw", &self.mrl_raw),
            ("crl_raw", &self.crl_raw),
            ("inn", &self.inn),
            ("ogrn", &self.ogrn),
            ("website", &self.website),
            ("full_legal_name", &self.full_legal_name),
            ("category", &self.category),
            ("region", &self.region),
        ];
        for (key, value) in named {
            if let Some(v) = value {
                out.insert(key.to_string(), v.clone());
            }
        }
        for (idx, year) in REPORT_YEARS.iter().enumerate() {
            if let Some(v) = &self.revenue[idx] {
                out.insert(format!("revenue_{}", year), v.clone());
            }
            if let Some(v) = &self.profit[idx] {
                out.insert(format!("profit_{}", year), v.clone());
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Stable identifier: hex SHA-256 of the trimmed company name.
    pub fn record_id(&self) -> String {
        let name = self.name.as_deref().unwrap_or("").trim();
        hex::encode(Sha256::digest(name.as_bytes()))
    }

    pub fn readiness_levels(&self) -> ReadinessLevels {
        ReadinessLevels {
            trl: parse_readiness_level(text(&self.trl_raw)),
            irl: parse_readiness_level(text(&self.irl_raw)),
            mrl: parse_readiness_level(text(&self.mrl_raw)),
            crl: parse_readiness_level(text(&self.crl_raw)),
        }
    }

    /// Parsed revenues aligned with [`REPORT_YEARS`] (newest first).
    pub fn revenues(&self) -> [f64; 6] {
        self.revenue.each_ref().map(|v| parse_money(text(v)))
    }

    /// Parsed profits aligned with [`REPORT_YEARS`] (newest first).
    pub fn profits(&self) -> [f64; 6] {
        self.profit.each_ref().map(|v| parse_money(text(v)))
    }

    pub fn patent_count(&self) -> usize {
        count_items(text(&self.patents))
    }

    pub fn technology_count(&self) -> usize {
        count_items(text(&self.technologies))
    }

    pub fn industry_count(&self) -> usize {
        count_items(text(&self.industries))
    }

    pub fn product_count(&self) -> usize {
        count_items(text(&self.product_names))
    }

    pub fn project_count(&self) -> usize {
        count_items(text(&self.project_names))
    }

    /// Descriptions, technologies and product names joined for keyword search.
    pub fn description_blob(&self) -> String {
        [
            &self.company_description,
            &self.project_description,
            &self.product_description,
            &self.technologies,
            &self.product_names,
        ]
        .iter()
        .map(|v| text(v))
        .collect::<Vec<_>>()
        .join(" ")
    }

    pub fn has_ai(&self) -> bool {
        has_ai_keywords(&self.description_blob())
    }

    /// Age in years relative to `reference_year`, 0 when the founding year is unusable.
    pub fn company_age(&self, reference_year: i32) -> i32 {
        match parse_founding_year(text(&self.year_founded)) {
            Some(year) => reference_year - year,
            None => 0,
        }
    }
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn year_slot(year: &str) -> Option<usize> {
    let year: i32 = year.parse().ok()?;
    REPORT_YEARS.iter().position(|&y| y == year)
}

/// Extract a readiness level (0..=9) from a raw field.
///
/// Accepts a plain number or `"N: description"` segments separated by `;`.
/// The highest level found wins; anything unparseable yields 0.
pub fn parse_readiness_level(raw: &str) -> u8 {
    let s = raw.trim();
    if s.is_empty() || s == "0" {
        return 0;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<u64>().map(|v| v.min(9) as u8).unwrap_or(9);
    }
    let segment_max = LEVEL_SEGMENT
        .captures_iter(s)
        .filter_map(|cap| cap.get(1)?.as_str().parse::<u8>().ok())
        .max();
    if let Some(level) = segment_max {
        return level;
    }
    s.chars()
        .find(|c| c.is_ascii_digit())
        .and_then(|c| c.to_digit(10))
        .map(|d| d as u8)
        .unwrap_or(0)
}

/// Parse a locale-formatted money amount (`"1 234,56"`, `"1,234.56"`).
/// Blanks, dashes and "not available" markers yield 0.0. The sign is kept so
/// losses stay negative.
pub fn parse_money(raw: &str) -> f64 {
    try_parse_money(raw).unwrap_or(0.0)
}

/// Like [`parse_money`], but `None` for blanks, markers and anything that is
/// not a number.
pub fn try_parse_money(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    // a comma before the last '.' groups thousands, otherwise it is the decimal mark
    let grouping = match (compact.find(','), compact.rfind('.')) {
        (Some(comma), Some(dot)) => comma < dot,
        _ => false,
    };
    let cleaned: String = if grouping {
        compact.chars().filter(|&c| c != ',').collect()
    } else {
        compact.chars().map(|c| if c == ',' { '.' } else { c }).collect()
    };
    let lowered = cleaned.to_lowercase();
    if matches!(
        lowered.as_str(),
        "" | "-" | "—" | "–" | "н/д" | "н/а" | "n/a" | "na" | "nan"
    ) {
        return None;
    }
    lowered.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Count non-empty `;`-separated entries.
pub fn count_items(raw: &str) -> usize {
    raw.split(';').filter(|item| !item.trim().is_empty()).count()
}

/// True if any AI keyword occurs in `text`. Short Latin keywords (`ai`, `ml`)
/// must stand as whole words so that e.g. "domain" does not count.
pub fn has_ai_keywords(text: &str) -> bool {
    let lowered = text.to_lowercase();
    AI_KEYWORDS.iter().any(|kw| {
        if kw.len() <= 3 && kw.is_ascii() {
            contains_word(&lowered, kw)
        } else {
            lowered.contains(kw)
        }
    })
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Parse a founding year. Accepts `"2015"` or a date starting with the year
/// (`"2015-03-01"`). Years outside [`FOUNDING_YEAR_RANGE`] are rejected.
pub fn parse_founding_year(raw: &str) -> Option<i32> {
    let s = raw.trim();
    let candidate = match s.parse::<i32>() {
        Ok(year) => year,
        Err(_) => {
            let head: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
            if head.len() != 4 {
                return None;
            }
            head.parse().ok()?
        }
    };
    let (lo, hi) = FOUNDING_YEAR_RANGE;
    (lo..=hi).contains(&candidate).then_some(candidate)
}

/// Loose key/value view of a record used for (de)serialisation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordFields(pub BTreeMap<String, serde_json::Value>);

impl From<RecordFields> for RawRecord {
    fn from(fields: RecordFields) -> Self {
        let mut record = RawRecord::default();
        for (key, value) in fields.0 {
            let value = match value {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Array(items) => Some(
                    items
                        .iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join("; "),
                ),
                other => Some(other.to_string()),
            };
            record.set_field(&key, value);
        }
        record
    }
}

impl From<RawRecord> for RecordFields {
    fn from(record: RawRecord) -> Self {
        RecordFields(
            record
                .fields()
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_level_takes_maximum_segment() {
        assert_eq!(parse_readiness_level("3: low; 7: high; 2: mid"), 7);
        assert_eq!(parse_readiness_level("8: Описание; 6: другое"), 8);
    }

    #[test]
    fn readiness_level_defaults() {
        assert_eq!(parse_readiness_level(""), 0);
        assert_eq!(parse_readiness_level("   "), 0);
        assert_eq!(parse_readiness_level("5"), 5);
        assert_eq!(parse_readiness_level("12"), 9);
        assert_eq!(parse_readiness_level("уровень не указан"), 0);
        assert_eq!(parse_readiness_level("level 4 reached"), 4);
    }

    #[test]
    fn money_parsing_handles_locale_and_markers() {
        assert!((parse_money("1 234,56") - 1234.56).abs() < 1e-9);
        assert_eq!(parse_money("-"), 0.0);
        assert_eq!(parse_money("н/д"), 0.0);
        assert_eq!(parse_money("N/A"), 0.0);
        assert_eq!(parse_money(""), 0.0);
        assert_eq!(parse_money("abc"), 0.0);
        assert_eq!(parse_money("-1500"), -1500.0);
        assert_eq!(parse_money("2\u{a0}000\u{a0}000"), 2_000_000.0);
        assert!((parse_money("1,234.56") - 1234.56).abs() < 1e-9);
        assert_eq!(parse_money("12,500,000.00"), 12_500_000.0);
        assert!((parse_money("0,5") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn strict_money_parsing_rejects_markers() {
        assert_eq!(try_parse_money("1 000,5"), Some(1000.5));
        assert_eq!(try_parse_money("0"), Some(0.0));
        assert_eq!(try_parse_money("н/д"), None);
        assert_eq!(try_parse_money("  "), None);
        assert_eq!(try_parse_money("abc"), None);
    }

    #[test]
    fn ai_keywords_respect_word_boundaries() {
        assert!(has_ai_keywords("Платформа на базе AI для медицины"));
        assert!(has_ai_keywords("Использует машинное обучение"));
        assert!(!has_ai_keywords("Domain-specific maintenance tooling"));
        assert!(has_ai_keywords("ML; computer vision"));
    }

    #[test]
    fn founding_year_parsing() {
        assert_eq!(parse_founding_year("2015"), Some(2015));
        assert_eq!(parse_founding_year("2015-03-01"), Some(2015));
        assert_eq!(parse_founding_year("1850"), None);
        assert_eq!(parse_founding_year("unknown"), None);
    }

    #[test]
    fn set_field_accepts_aliases_and_years() {
        let mut record = RawRecord::default();
        assert!(record.set_field("description", Some("project".into())));
        assert!(record.set_field("revenue_2023", Some("100".into())));
        assert!(!record.set_field("revenue_1999", Some("100".into())));
        assert!(!record.set_field("unknown_column", Some("x".into())));
        assert_eq!(record.project_description.as_deref(), Some("project"));
        assert_eq!(record.revenue[2].as_deref(), Some("100"));
    }

    #[test]
    fn json_roundtrip_keeps_fields() {
        let json = r#"{"name": "Acme", "revenue_2024": 1500000, "technologies": ["AI", "IoT"], "inn": null}"#;
        let record: RawRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.name.as_deref(), Some("Acme"));
        assert_eq!(record.revenue[1].as_deref(), Some("1500000"));
        assert_eq!(record.technology_count(), 2);
        assert!(record.inn.is_none());
    }

    #[test]
    fn record_id_is_stable_hash_of_name() {
        let mut a = RawRecord::default();
        a.name = Some("Acme ".into());
        let mut b = RawRecord::default();
        b.name = Some("Acme".into());
        assert_eq!(a.record_id(), b.record_id());
        assert_eq!(a.record_id().len(), 64);
    }
}
