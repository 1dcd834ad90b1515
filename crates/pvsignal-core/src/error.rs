use thiserror::Error;

/// Top-level error type for the signal-detection system.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for PvError` so that `?` works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PvError {
    /// Malformed input or missing required columns. User-fixable.
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// An encoder input invariant was violated (empty text, dimension drift).
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Internal invariant violation while scoring a cluster.
    #[error("Scoring error: {0}")]
    Scoring(String),

    /// Summary generation failed for a single cluster.
    #[error("Summarization failed for cluster {cluster_id}: {reason}")]
    Summarization { cluster_id: i32, reason: String },

    /// A pipeline run is already in flight.
    #[error("Pipeline busy: a run is already in progress")]
    PipelineBusy,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PvError {
    /// Whether the caller can fix the problem and retry (bad input, busy pipeline,
    /// a summarizer hiccup). Invariant violations are not recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PvError::DataFormat(_) | PvError::Summarization { .. } | PvError::PipelineBusy
        )
    }
}

impl From<toml::de::Error> for PvError {
    fn from(err: toml::de::Error) -> Self {
        PvError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PvError {
    fn from(err: toml::ser::Error) -> Self {
        PvError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PvError {
    fn from(err: serde_json::Error) -> Self {
        PvError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for pvsignal operations.
pub type Result<T> = std::result::Result<T, PvError>;
