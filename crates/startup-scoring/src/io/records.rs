//! Company profile CSV / JSONL readers and the labelled CSV writer.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use csv::StringRecord;
use serde::Deserialize;

use crate::labeler::LabeledRecord;
use crate::record::{ExternalRecord, RawRecord, REPORT_YEARS};
use crate::target::Target;

/// Registry column headers and the logical field they feed.
pub const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("Название компании", "name"),
    ("Сайт", "website"),
    ("Описание компании", "company_description"),
    ("Описание проектов", "project_description"),
    ("Описание продуктов", "product_description"),
    ("TRL (по продуктам)", "trl_raw"),
    ("IRL - Уровень", "irl_raw"),
    ("MRL (по продуктам)", "mrl_raw"),
    ("CRL - Уровень", "crl_raw"),
    ("Статус организации", "status"),
    ("Кластер", "cluster"),
    ("Патенты", "patents"),
    ("Технологии проекта", "technologies"),
    ("Отрасли применения", "industries"),
    ("Названия продуктов", "product_names"),
    ("Названия проектов", "project_names"),
    ("ИНН", "inn"),
    ("ОГРН", "ogrn"),
    ("Год основания", "year_founded"),
    ("Полное наименование", "full_legal_name"),
    ("Категория", "category"),
    ("Регион", "region"),
];

/// Logical field name for a CSV header, or `None` for columns the record does not carry.
pub fn resolve_column(header: &str) -> Option<String> {
    let header = header.trim().trim_start_matches('\u{feff}');
    if let Some((_, field)) = COLUMN_ALIASES.iter().find(|(alias, _)| *alias == header) {
        return Some(field.to_string());
    }
    for year in REPORT_YEARS {
        if header == format!("Выручка {}", year) {
            return Some(format!("revenue_{}", year));
        }
        if header == format!("Прибыль {}", year) {
            return Some(format!("profit_{}", year));
        }
    }
    let lowered = header.to_ascii_lowercase();
    RawRecord::default()
        .set_field(&lowered, Some("x".to_string()))
        .then_some(lowered)
}

/// Read company records from a comma-separated file with a header row.
/// Unknown columns are ignored and empty cells stay unset.
pub fn read_records_csv<P: AsRef<Path>>(path: P) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(&path)
        .with_context(|| format!("Failed to open records file: {}", path.as_ref().display()))?;

    let headers = reader
        .headers()
        .context("Failed to read records header row")?
        .clone();
    let columns = map_columns(&headers);
    let unmapped = columns.iter().filter(|c| c.is_none()).count();
    if unmapped > 0 {
        log::debug!("Ignoring {} unmapped columns", unmapped);
    }

    let mut records = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let row = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;
        let mut record = RawRecord::default();
        for (idx, value) in row.iter().enumerate() {
            if let Some(Some(field)) = columns.get(idx) {
                record.set_field(field, Some(value.to_string()));
            }
        }
        records.push(record);
    }
    log::info!(
        "Read {} records from {}",
        records.len(),
        path.as_ref().display()
    );
    Ok(records)
}

fn map_columns(headers: &StringRecord) -> Vec<Option<String>> {
    headers.iter().map(resolve_column).collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExternalLine {
    Wrapped {
        record: RawRecord,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        source_reliability: Option<f64>,
    },
    Bare(RawRecord),
}

/// Read external records, one JSON object per line. Lines may wrap the record
/// as `{"source": ..., "record": {...}}` or be a bare record. Malformed lines
/// are skipped with a warning.
pub fn read_external_jsonl<P: AsRef<Path>>(path: P) -> Result<Vec<ExternalRecord>> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open external records: {}", path.as_ref().display()))?;
    let mut out = Vec::new();
    for (line_idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", line_idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ExternalLine>(&line) {
            Ok(ExternalLine::Wrapped {
                record,
                source,
                source_reliability,
            }) => out.push(ExternalRecord {
                record,
                source,
                source_reliability,
            }),
            Ok(ExternalLine::Bare(record)) => out.push(ExternalRecord::new(record)),
            Err(e) => log::warn!("Skipping malformed external record on line {}: {}", line_idx + 1, e),
        }
    }
    Ok(out)
}

/// Write labelled records with their parsed signals and rounded scores.
pub fn write_labeled_csv<P: AsRef<Path>>(path: P, records: &[LabeledRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("Failed to create {}", path.as_ref().display()))?;

    let mut header: Vec<String> = [
        "id",
        "name",
        "inn",
        "cluster",
        "status",
        "year",
        "trl",
        "irl",
        "mrl",
        "crl",
        "patent_count",
        "has_ai",
        "tech_count",
        "industry_count",
        "product_count",
        "max_revenue",
        "max_profit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(Target::ALL.iter().map(|t| format!("score_{}", t)));
    writer.write_record(&header).context("Failed to write header")?;

    for r in records {
        let mut row = vec![
            r.id.clone(),
            r.name.clone(),
            r.inn.clone(),
            r.cluster.clone(),
            r.status.clone(),
            r.year_founded.clone(),
            r.levels.trl.to_string(),
            r.levels.irl.to_string(),
            r.levels.mrl.to_string(),
            r.levels.crl.to_string(),
            r.patent_count.to_string(),
            u8::from(r.has_ai).to_string(),
            r.tech_count.to_string(),
            r.industry_count.to_string(),
            r.product_count.to_string(),
            r.max_revenue.to_string(),
            r.max_profit.to_string(),
        ];
        row.extend(
            Target::ALL
                .iter()
                .map(|&t| format!("{:.2}", r.labels.get(t))),
        );
        writer
            .write_record(&row)
            .with_context(|| format!("Failed to write record {}", r.id))?;
    }
    writer.flush().context("Failed to flush labelled CSV")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn resolves_registry_and_logical_headers() {
        assert_eq!(resolve_column("Название компании").as_deref(), Some("name"));
        assert_eq!(resolve_column("Выручка 2023").as_deref(), Some("revenue_2023"));
        assert_eq!(resolve_column("Прибыль 2020").as_deref(), Some("profit_2020"));
        assert_eq!(resolve_column("TRL").as_deref(), Some("trl"));
        assert_eq!(resolve_column("revenue_2024").as_deref(), Some("revenue_2024"));
        assert_eq!(resolve_column("Unrelated"), None);
    }

    #[test]
    fn external_jsonl_skips_bad_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"source": "registry", "record": {{"name": "A", "trl": "5"}}}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"name": "B", "revenue_2024": "1 000"}}"#).unwrap();
        let records = read_external_jsonl(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source.as_deref(), Some("registry"));
        assert_eq!(records[0].record.readiness_levels().trl, 5);
        assert_eq!(records[1].source, None);
        assert_eq!(records[1].record.revenues()[1], 1000.0);
    }
}
