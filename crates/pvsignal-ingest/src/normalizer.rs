//! Delimited-text normalizer.
//!
//! Produces one [`AeRecord`] per usable source row. The header row is matched
//! against [`CanonicalColumn`] aliases; the delimiter is sniffed from it.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use pvsignal_core::config::IngestConfig;
use pvsignal_core::{AeRecord, PvError, Result, Severity};

use crate::columns::{CanonicalColumn, ColumnMap};
use crate::severity::map_severity;

/// Candidate delimiters in tie-break order.
const DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

/// Separator inside a single combined source column.
const COMBINED_SEPARATOR: char = '$';

/// Cell values treated as explicit nulls (compared lower-cased).
const NULL_TOKENS: [&str; 6] = ["", "nan", "null", "none", "na", "n/a"];

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Knobs for one normalization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Drop exact (drug, adverse event, date) repeats, keeping the first.
    pub dedupe: bool,
    /// Used for null and unmapped severity codes.
    pub default_severity: Severity,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            dedupe: false,
            default_severity: Severity::default(),
        }
    }
}

impl From<&IngestConfig> for NormalizeOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            dedupe: config.dedupe,
            default_severity: Severity::new(config.default_severity).unwrap_or_default(),
        }
    }
}

/// Counters describing what normalization did to the input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationReport {
    /// Data rows read, header excluded.
    pub total_rows: usize,
    pub kept: usize,
    /// Rows without a drug name or adverse event term.
    pub dropped_missing: usize,
    pub duplicates: usize,
    pub unparsed_dates: usize,
    pub unmapped_severities: usize,
    pub delimiter: char,
    /// 1-based line holding the header.
    pub header_line: usize,
    /// Whether rows were split out of a single `$`-joined column.
    pub combined_column: bool,
    pub has_labels: bool,
}

/// Normalizer output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedDataset {
    pub records: Vec<AeRecord>,
    pub report: NormalizationReport,
}

/// How the source file is laid out.
struct Layout {
    delimiter: u8,
    header_index: usize,
    columns: ColumnMap,
    combined: bool,
}

/// Normalize a raw upload into canonical records.
///
/// Fails with [`PvError::DataFormat`] on empty input, when the required
/// columns cannot be found with either of the first two lines as header, or
/// when no row carries both a drug name and an adverse event term.
pub fn normalize(input: &[u8], options: &NormalizeOptions) -> Result<NormalizedDataset> {
    let text = String::from_utf8_lossy(input);
    let text = text.trim_start_matches('\u{feff}');
    if text.trim().is_empty() {
        return Err(PvError::DataFormat("input is empty".to_string()));
    }

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).take(2).collect();

    let (layout, rows) = match detect_layout(text, &lines, 0)? {
        Ok(found) => found,
        Err(missing) => {
            if lines.len() < 2 {
                return Err(missing_columns_error(&missing));
            }
            debug!("Required columns missing on line 1, retrying with line 2 as header");
            detect_layout(text, &lines, 1)?.map_err(|_| missing_columns_error(&missing))?
        }
    };

    let mut report = NormalizationReport {
        delimiter: layout.delimiter as char,
        header_line: layout.header_index + 1,
        combined_column: layout.combined,
        ..Default::default()
    };

    let mut records = Vec::new();
    let mut seen: HashSet<(String, String, Option<NaiveDate>)> = HashSet::new();
    let mut unmapped_codes: BTreeSet<String> = BTreeSet::new();
    let mut labelled = 0usize;

    for (offset, row) in rows.iter().skip(layout.header_index + 1).enumerate() {
        let row_number = offset + 1;
        report.total_rows += 1;

        let fields = split_row(row, &layout);
        let cell = |column: CanonicalColumn| -> Option<String> {
            layout
                .columns
                .position(column)
                .and_then(|pos| fields.get(pos))
                .and_then(|raw| clean_cell(raw))
        };

        let (Some(drug_name), Some(adverse_event_term)) = (
            cell(CanonicalColumn::DrugName),
            cell(CanonicalColumn::AdverseEventTerm),
        ) else {
            report.dropped_missing += 1;
            continue;
        };

        let report_date = match cell(CanonicalColumn::ReportDate) {
            Some(raw) => {
                let parsed = parse_date(&raw);
                if parsed.is_none() {
                    report.unparsed_dates += 1;
                }
                parsed
            }
            None => None,
        };

        if options.dedupe
            && !seen.insert((drug_name.clone(), adverse_event_term.clone(), report_date))
        {
            report.duplicates += 1;
            continue;
        }

        let severity = match cell(CanonicalColumn::Severity) {
            Some(code) => map_severity(&code).unwrap_or_else(|| {
                report.unmapped_severities += 1;
                unmapped_codes.insert(code);
                options.default_severity
            }),
            None => options.default_severity,
        };

        let label = cell(CanonicalColumn::Label).and_then(|raw| parse_label(&raw));
        if label.is_some() {
            labelled += 1;
        }

        let raw_text = cell(CanonicalColumn::RawText)
            .unwrap_or_else(|| format!("{} {}", drug_name, adverse_event_term));

        records.push(AeRecord {
            report_id: cell(CanonicalColumn::ReportId)
                .unwrap_or_else(|| format!("row-{}", row_number)),
            drug_name,
            adverse_event_term,
            report_date,
            severity,
            raw_text,
            label,
        });
    }

    if records.is_empty() {
        return Err(PvError::DataFormat(
            "no rows carry both a drug name and an adverse event term".to_string(),
        ));
    }

    report.kept = records.len();
    report.has_labels = labelled == records.len();

    if !unmapped_codes.is_empty() {
        warn!(
            count = report.unmapped_severities,
            codes = ?unmapped_codes,
            "Unmapped severity codes replaced with default"
        );
    }

    info!(
        total = report.total_rows,
        kept = report.kept,
        dropped = report.dropped_missing,
        duplicates = report.duplicates,
        delimiter = ?report.delimiter,
        "Normalized AE records"
    );

    Ok(NormalizedDataset { records, report })
}

/// Try line `header_index` as header. The inner `Err` lists required columns
/// that could not be found.
fn detect_layout(
    text: &str,
    lines: &[&str],
    header_index: usize,
) -> Result<std::result::Result<(Layout, Vec<Vec<String>>), Vec<CanonicalColumn>>> {
    let delimiter = lines
        .get(header_index)
        .map(|line| sniff_delimiter(line))
        .unwrap_or(b',');
    let rows = read_rows(text, delimiter)?;

    let Some(header) = rows.get(header_index) else {
        return Ok(Err(CanonicalColumn::REQUIRED.to_vec()));
    };

    let combined = header.len() == 1 && header[0].contains(COMBINED_SEPARATOR);
    let cells: Vec<&str> = if combined {
        header[0].split(COMBINED_SEPARATOR).collect()
    } else {
        header.iter().map(String::as_str).collect()
    };

    let columns = ColumnMap::resolve(&cells);
    let missing = columns.missing_required();
    if !missing.is_empty() {
        return Ok(Err(missing));
    }

    Ok(Ok((
        Layout {
            delimiter,
            header_index,
            columns,
            combined,
        },
        rows,
    )))
}

/// Most frequent candidate delimiter in the header line; `,` when none occur.
pub(crate) fn sniff_delimiter(line: &str) -> u8 {
    let mut best = b',';
    let mut best_count = 0usize;
    for candidate in DELIMITERS {
        let count = line.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

fn read_rows(text: &str, delimiter: u8) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| PvError::DataFormat(format!("malformed delimited text: {}", e)))
        })
        .collect()
}

fn split_row(row: &[String], layout: &Layout) -> Vec<String> {
    if layout.combined {
        let joined = row.join(&(layout.delimiter as char).to_string());
        joined.split(COMBINED_SEPARATOR).map(str::to_string).collect()
    } else {
        row.to_vec()
    }
}

/// Trim, collapse internal whitespace and map null tokens to `None`.
fn clean_cell(raw: &str) -> Option<String> {
    let cleaned = WHITESPACE.replace_all(raw.trim(), " ").into_owned();
    let lowered = cleaned.to_lowercase();
    if NULL_TOKENS.contains(&lowered.as_str()) {
        None
    } else {
        Some(cleaned)
    }
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

fn parse_label(raw: &str) -> Option<u8> {
    match raw.to_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" | "y" => Some(1),
        "0" | "0.0" | "false" | "no" | "n" => Some(0),
        _ => None,
    }
}

fn missing_columns_error(missing: &[CanonicalColumn]) -> PvError {
    let names: Vec<&str> = missing.iter().map(|c| c.as_str()).collect();
    PvError::DataFormat(format!("missing required column(s): {}", names.join(", ")))
}
