//! Header resolution against the documented alias lists.

use std::fmt;

/// Canonical record columns a source header can map onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalColumn {
    ReportId,
    DrugName,
    AdverseEventTerm,
    ReportDate,
    Severity,
    RawText,
    Label,
}

impl CanonicalColumn {
    pub const ALL: [CanonicalColumn; 7] = [
        CanonicalColumn::ReportId,
        CanonicalColumn::DrugName,
        CanonicalColumn::AdverseEventTerm,
        CanonicalColumn::ReportDate,
        CanonicalColumn::Severity,
        CanonicalColumn::RawText,
        CanonicalColumn::Label,
    ];

    /// Columns without which a file cannot be processed.
    pub const REQUIRED: [CanonicalColumn; 2] =
        [CanonicalColumn::DrugName, CanonicalColumn::AdverseEventTerm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReportId => "report_id",
            Self::DrugName => "drug_name",
            Self::AdverseEventTerm => "adverse_event_term",
            Self::ReportDate => "report_date",
            Self::Severity => "severity",
            Self::RawText => "raw_text",
            Self::Label => "label",
        }
    }

    /// Accepted header spellings, after [`normalize_header`]. Earlier entries
    /// win when a file carries several aliases of the same column.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::ReportId => &["report_id", "id", "safetyreportid", "primaryid", "rxaui"],
            Self::DrugName => &["drug_name", "drug", "drugname", "medicinalproduct", "product"],
            Self::AdverseEventTerm => &[
                "adverse_event_term",
                "adverse_event",
                "reaction",
                "adverse_reaction",
                "event",
                "reactionmeddrapt",
                "pt",
            ],
            Self::ReportDate => &[
                "report_date",
                "date",
                "event_date",
                "date_received",
                "receivedate",
                "timestamp",
                "time",
            ],
            Self::Severity => &[
                "severity",
                "seriousness",
                "serious",
                "severity_score",
                "seriousness_score",
                "outcome",
            ],
            Self::RawText => &["raw_text", "text", "narrative", "description"],
            Self::Label => &["label", "is_adr", "class", "target", "ground_truth"],
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for CanonicalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-case a header cell and fold spaces and hyphens into underscores.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{feff}')
        .trim_matches('"')
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Position of each canonical column in a source header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    positions: [Option<usize>; 7],
}

impl ColumnMap {
    /// Resolve a header row. Unrecognised headers are ignored.
    pub fn resolve<S: AsRef<str>>(headers: &[S]) -> Self {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();
        let mut map = ColumnMap::default();

        for column in CanonicalColumn::ALL {
            map.positions[column.index()] = column
                .aliases()
                .iter()
                .find_map(|alias| normalized.iter().position(|h| h == alias));
        }
        map
    }

    pub fn position(&self, column: CanonicalColumn) -> Option<usize> {
        self.positions[column.index()]
    }

    /// Required columns absent from the header.
    pub fn missing_required(&self) -> Vec<CanonicalColumn> {
        CanonicalColumn::REQUIRED
            .into_iter()
            .filter(|c| self.position(*c).is_none())
            .collect()
    }
}
