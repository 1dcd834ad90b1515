//! Summarizer collaborator and the built-in template narrative.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::SummaryPayload;

/// Failure of a single summary call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SummarizerError {
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("cancelled: dataset was replaced or reset")]
    Cancelled,
    #[error("summarizer returned empty text")]
    EmptyText,
    #[error("summarizer unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Backend(String),
}

/// Turns a [`SummaryPayload`] into narrative text.
///
/// Implementations see only the payload; they never touch records or
/// snapshots. Calls for different clusters may run concurrently.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, payload: &SummaryPayload) -> Result<String, SummarizerError>;

    fn name(&self) -> &str;
}

/// Deterministic narrative built from fixed bands over the payload metrics.
#[derive(Debug, Clone)]
pub struct TemplateSummarizer {
    /// Events listed by name before the rest are counted.
    listed_events: usize,
}

impl TemplateSummarizer {
    pub fn new() -> Self {
        Self { listed_events: 3 }
    }

    fn severity_band(severity: f64) -> &'static str {
        if severity >= 2.0 {
            "high"
        } else if severity >= 1.5 {
            "moderate"
        } else {
            "low to moderate"
        }
    }

    fn trend(payload: &SummaryPayload) -> String {
        if payload.growth_undefined {
            return "not assessable (no reports in the baseline window)".to_string();
        }
        let g = payload.growth_rate;
        let band = if g > 1.5 {
            "increasing"
        } else if g > 1.0 {
            "slightly increasing"
        } else if g < 0.8 {
            "decreasing"
        } else {
            "stable"
        };
        format!("{} (growth rate {:.2})", band, g)
    }

    fn recommendation(score: f64) -> &'static str {
        if score > 50.0 {
            "Priority signal: prompt clinical review is recommended."
        } else if score > 20.0 {
            "Moderate signal: continue monitoring for new reports."
        } else {
            "Low signal: routine surveillance is sufficient."
        }
    }

    fn events(&self, events: &[String]) -> String {
        match events.len() {
            0 => "unspecified events".to_string(),
            n if n <= self.listed_events => events.join(", "),
            n => {
                let rest = n - self.listed_events;
                format!(
                    "{} and {} other event type{}",
                    events[..self.listed_events].join(", "),
                    rest,
                    if rest == 1 { "" } else { "s" }
                )
            }
        }
    }

    pub fn render(&self, payload: &SummaryPayload) -> String {
        format!(
            "Cluster {} groups {} report{} dominated by {}. Mean severity is {:.2} ({}); \
             the reporting trend is {}. Signal score {:.1}. {}",
            payload.cluster_id,
            payload.frequency,
            if payload.frequency == 1 { "" } else { "s" },
            self.events(&payload.top_adverse_events),
            payload.severity,
            Self::severity_band(payload.severity),
            Self::trend(payload),
            payload.signal_score,
            Self::recommendation(payload.signal_score),
        )
    }
}

impl Default for TemplateSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for TemplateSummarizer {
    async fn summarize(&self, payload: &SummaryPayload) -> Result<String, SummarizerError> {
        Ok(self.render(payload))
    }

    fn name(&self) -> &str {
        "template"
    }
}
