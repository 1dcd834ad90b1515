//! Signal detection over embedded AE records.
//!
//! - [`cluster`]: DBSCAN, k-means and HDBSCAN partitioning
//! - [`quality`]: silhouette and Davies–Bouldin scores
//! - [`signal`]: per-cluster frequency, severity, growth and signal score
//! - [`evaluation`]: cluster-majority classification metrics
//! - [`rank`]: top-N ranking and cluster search
//! - [`assembler`] and [`summarizer`]: bounded, isolated summary generation

pub mod assembler;
pub mod cluster;
pub mod error;
pub mod evaluation;
pub mod quality;
pub mod rank;
pub mod signal;
pub mod summarizer;
pub mod types;

pub use assembler::{build_payload, top_adverse_events, SummaryAssembler};
pub use cluster::cluster;
pub use error::InsightError;
pub use evaluation::classification_metrics;
pub use quality::clustering_quality;
pub use rank::{rank, search};
pub use signal::{overview, signal_score, GrowthWindow, SignalScorer};
pub use summarizer::{Summarizer, SummarizerError, TemplateSummarizer};
pub use types::{
    ClassificationMetrics, Cluster, ClusterParams, Clustering, ClusteringQuality, SignalOverview,
    SummaryPayload,
};
