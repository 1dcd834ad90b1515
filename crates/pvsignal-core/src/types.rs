//! Shared domain types for the signal-detection pipeline.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PvError;

/// Cluster id reserved for records the clusterer could not place.
pub const NOISE_CLUSTER_ID: i32 = -1;

/// Monotonic identifier of one uploaded dataset.
pub type DatasetVersion = u64;

// =============================================================================
// Records
// =============================================================================

/// Severity on the fixed ordinal scale 1 (mild) ..= 5 (fatal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Severity(u8);

impl Severity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub const MILD: Severity = Severity(1);
    pub const MODERATE: Severity = Severity(2);
    pub const SEVERE: Severity = Severity(3);
    pub const LIFE_THREATENING: Severity = Severity(4);
    pub const FATAL: Severity = Severity(5);

    /// Returns `None` when the ordinal is outside 1..=5.
    pub fn new(ordinal: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX)
            .contains(&ordinal)
            .then_some(Severity(ordinal))
    }

    pub fn ordinal(self) -> u8 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::MILD
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Severity::new(value).ok_or_else(|| format!("severity {} outside 1..=5", value))
    }
}

impl From<Severity> for u8 {
    fn from(s: Severity) -> u8 {
        s.0
    }
}

/// One normalized adverse-event report. Never mutated after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AeRecord {
    pub report_id: String,
    pub drug_name: String,
    pub adverse_event_term: String,
    /// `null` when the source row had no parseable date.
    pub report_date: Option<NaiveDate>,
    pub severity: Severity,
    pub raw_text: String,
    /// Ground-truth label (0/1) when the source carries one.
    pub label: Option<u8>,
}

impl AeRecord {
    /// The text handed to the embedder for this record.
    pub fn embedding_text(&self, field: EmbedField) -> String {
        match field {
            EmbedField::AdverseEvent => self.adverse_event_term.clone(),
            EmbedField::Drug => self.drug_name.clone(),
            EmbedField::Combined => format!("{} {}", self.drug_name, self.adverse_event_term),
            EmbedField::RawText => self.raw_text.clone(),
        }
    }
}

/// Which record text feeds the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedField {
    AdverseEvent,
    Drug,
    Combined,
    RawText,
}

// =============================================================================
// Clustering
// =============================================================================

/// Clustering algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterMethod {
    #[serde(rename = "dbscan")]
    Dbscan,
    #[serde(rename = "kmeans")]
    KMeans,
    #[serde(rename = "hdbscan")]
    Hdbscan,
}

impl ClusterMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dbscan => "dbscan",
            Self::KMeans => "kmeans",
            Self::Hdbscan => "hdbscan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dbscan" => Some(Self::Dbscan),
            "kmeans" => Some(Self::KMeans),
            "hdbscan" => Some(Self::Hdbscan),
            _ => None,
        }
    }
}

/// Per-cluster statistics derived from cluster membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    pub cluster_id: i32,
    /// Number of members; always equal to the cluster's member count.
    pub frequency: usize,
    /// Mean member severity, clamped to 1..=5.
    pub severity: f64,
    /// Recent-window count over baseline-window count (1.0 when undefined).
    pub growth_rate: f64,
    /// True when the baseline window was empty and `growth_rate` is the 1.0 sentinel.
    pub growth_undefined: bool,
    /// frequency × severity × growth_rate.
    pub signal_score: f64,
}

/// Record field searched by cluster lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Drug,
    AdverseEvent,
}

impl SearchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drug => "drug",
            Self::AdverseEvent => "adverse_event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "drug" => Some(Self::Drug),
            "adverse_event" => Some(Self::AdverseEvent),
            _ => None,
        }
    }
}

// =============================================================================
// Summaries
// =============================================================================

/// Generated narrative for one top-ranked cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub cluster_id: i32,
    pub text: String,
    pub top_adverse_events: Vec<String>,
    /// Metrics the payload was built from.
    pub metrics: ClusterMetrics,
    pub dataset_version: DatasetVersion,
    pub generated_at: DateTime<Utc>,
}

/// Per-cluster result of a summary batch. One failure never hides the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SummaryOutcome {
    Ready(Summary),
    Failed { cluster_id: i32, error: String },
}

impl SummaryOutcome {
    /// Failure marker for one cluster. The message is that of
    /// [`PvError::Summarization`].
    pub fn failed(cluster_id: i32, reason: impl Into<String>) -> Self {
        let error = PvError::Summarization {
            cluster_id,
            reason: reason.into(),
        };
        Self::Failed {
            cluster_id,
            error: error.to_string(),
        }
    }

    pub fn cluster_id(&self) -> i32 {
        match self {
            Self::Ready(s) => s.cluster_id,
            Self::Failed { cluster_id, .. } => *cluster_id,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn summary(&self) -> Option<&Summary> {
        match self {
            Self::Ready(s) => Some(s),
            Self::Failed { .. } => None,
        }
    }
}

// =============================================================================
// Processing state
// =============================================================================

/// Pipeline stage currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalizing,
    Embedding,
    Clustering,
    Scoring,
}

impl Stage {
    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Normalizing => Some(Stage::Embedding),
            Stage::Embedding => Some(Stage::Clustering),
            Stage::Clustering => Some(Stage::Scoring),
            Stage::Scoring => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Normalizing => write!(f, "normalizing"),
            Stage::Embedding => write!(f, "embedding"),
            Stage::Clustering => write!(f, "clustering"),
            Stage::Scoring => write!(f, "scoring"),
        }
    }
}

/// Progress of the pipeline owned by one coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessingState {
    Idle,
    Running { stage: Stage },
    Ready { version: DatasetVersion },
    Failed { reason: String },
}

impl ProcessingState {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessingState::Running { .. })
    }

    /// Returns whether a transition from `self` to `target` is valid.
    ///
    /// A run starts at `Normalizing` from any settled state, walks the stages
    /// in order, and ends in `Ready` (after `Scoring`) or `Failed`. Reset to
    /// `Idle` is always allowed.
    pub fn can_transition_to(&self, target: &ProcessingState) -> bool {
        use ProcessingState::*;
        match (self, target) {
            (_, Idle) => true,
            (Idle | Ready { .. } | Failed { .. }, Running { stage }) => *stage == Stage::Normalizing,
            (Running { stage: from }, Running { stage: to }) => from.next() == Some(*to),
            (Running { stage }, Ready { .. }) => *stage == Stage::Scoring,
            (Running { .. }, Failed { .. }) => true,
            _ => false,
        }
    }
}

impl Default for ProcessingState {
    fn default() -> Self {
        ProcessingState::Idle
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingState::Idle => write!(f, "idle"),
            ProcessingState::Running { stage } => write!(f, "running<{}>", stage),
            ProcessingState::Ready { version } => write!(f, "ready(v{})", version),
            ProcessingState::Failed { reason } => write!(f, "failed({})", reason),
        }
    }
}
