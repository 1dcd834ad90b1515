//! Severity code mapping.
//!
//! Source files encode seriousness in many ways: ordinals, words, yes/no
//! flags and FAERS outcome codes. Every accepted code is listed here; anything
//! else is reported as unmapped by the caller and never guessed.

use pvsignal_core::Severity;

/// Fixed code table, one row per ordinal. Codes are compared lower-cased.
const SEVERITY_TABLE: &[(Severity, &[&str])] = &[
    (
        Severity::MILD,
        &["1", "mild", "minor", "non-serious", "nonserious", "no", "n", "0", "false"],
    ),
    (Severity::MODERATE, &["2", "moderate", "ot", "ri", "other"]),
    (
        Severity::SEVERE,
        &["3", "severe", "serious", "yes", "y", "true", "ho", "ds", "ca"],
    ),
    (
        Severity::LIFE_THREATENING,
        &["4", "life-threatening", "life threatening", "lt"],
    ),
    (Severity::FATAL, &["5", "fatal", "death", "died", "de"]),
];

/// Map a raw (non-null) severity code to its ordinal.
///
/// Integral numeric spellings such as `"3.0"` are accepted for the numeric
/// codes. Returns `None` for codes outside the table.
pub fn map_severity(raw: &str) -> Option<Severity> {
    let code = raw.trim().to_lowercase();
    if code.is_empty() {
        return None;
    }

    let code = match code.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && (0.0..=5.0).contains(&v) => format!("{}", v as u8),
        _ => code,
    };

    SEVERITY_TABLE
        .iter()
        .find(|(_, codes)| codes.contains(&code.as_str()))
        .map(|(severity, _)| *severity)
}
