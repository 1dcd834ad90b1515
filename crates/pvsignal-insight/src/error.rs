use thiserror::Error;

use pvsignal_core::PvError;

/// Errors raised while clustering or scoring.
#[derive(Error, Debug)]
pub enum InsightError {
    /// A cluster broke a scoring precondition (empty, or a member index out of range).
    #[error("scoring error: {0}")]
    Scoring(String),
    #[error("invalid clustering input: {0}")]
    InvalidInput(String),
    #[error("clustering task failed: {0}")]
    Task(String),
}

impl From<InsightError> for PvError {
    fn from(err: InsightError) -> Self {
        match err {
            InsightError::Scoring(msg) => PvError::Scoring(msg),
            InsightError::InvalidInput(msg) => PvError::Embedding(msg),
            InsightError::Task(msg) => PvError::Scoring(msg),
        }
    }
}
