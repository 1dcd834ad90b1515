//! Immutable per-version dataset state.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pvsignal_core::{AeRecord, ClusterMetrics, DatasetVersion, Summary};
use pvsignal_ingest::NormalizationReport;
use pvsignal_insight::{ClassificationMetrics, Clustering, ClusteringQuality, SignalOverview};

/// Everything one pipeline run produced. Never mutated after publication
/// apart from the summary cache.
#[derive(Debug)]
pub struct DatasetSnapshot {
    pub version: DatasetVersion,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub records: Vec<AeRecord>,
    pub embeddings: Vec<Vec<f32>>,
    pub clustering: Clustering,
    /// Ascending cluster id.
    pub metrics: Vec<ClusterMetrics>,
    pub quality: ClusteringQuality,
    pub overview: SignalOverview,
    pub classification: Option<ClassificationMetrics>,
    pub normalization: NormalizationReport,
    /// Ready summaries by cluster id. Failures are never cached.
    summaries: Mutex<HashMap<i32, Summary>>,
    /// Held while a summary batch fills the cache.
    summary_gate: tokio::sync::Mutex<()>,
}

impl DatasetSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: DatasetVersion,
        run_id: Uuid,
        records: Vec<AeRecord>,
        embeddings: Vec<Vec<f32>>,
        clustering: Clustering,
        metrics: Vec<ClusterMetrics>,
        quality: ClusteringQuality,
        overview: SignalOverview,
        classification: Option<ClassificationMetrics>,
        normalization: NormalizationReport,
    ) -> Self {
        Self {
            version,
            run_id,
            created_at: Utc::now(),
            records,
            embeddings,
            clustering,
            metrics,
            quality,
            overview,
            classification,
            normalization,
            summaries: Mutex::new(HashMap::new()),
            summary_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Serializes summary batches on this snapshot, so concurrent requests
    /// reuse each other's results instead of racing past an empty cache.
    pub async fn summary_gate(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.summary_gate.lock().await
    }

    pub fn cached_summary(&self, cluster_id: i32) -> Option<Summary> {
        self.summaries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&cluster_id)
            .cloned()
    }

    pub fn cache_summary(&self, summary: Summary) {
        self.summaries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(summary.cluster_id, summary);
    }

    pub fn cached_summary_count(&self) -> usize {
        self.summaries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn cluster_of(&self, record: usize) -> Option<i32> {
        self.clustering.labels.get(record).copied()
    }
}

/// Aggregate dataset metrics for one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetrics {
    pub version: DatasetVersion,
    pub total_records: usize,
    pub clustering: ClusteringQuality,
    pub signals: SignalOverview,
    pub classification: Option<ClassificationMetrics>,
    pub normalization: NormalizationReport,
}

impl From<&DatasetSnapshot> for DatasetMetrics {
    fn from(snapshot: &DatasetSnapshot) -> Self {
        Self {
            version: snapshot.version,
            total_records: snapshot.records.len(),
            clustering: snapshot.quality.clone(),
            signals: snapshot.overview.clone(),
            classification: snapshot.classification.clone(),
            normalization: snapshot.normalization.clone(),
        }
    }
}

/// A top-ranked cluster together with its summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    #[serde(flatten)]
    pub metrics: ClusterMetrics,
    pub top_adverse_events: Vec<String>,
    /// `None` when generation failed; `error` then says why.
    pub summary: Option<String>,
    pub error: Option<String>,
}

/// One row of the cleaned-record listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    #[serde(flatten)]
    pub record: AeRecord,
    /// `-1` for noise.
    pub cluster_id: i32,
}

/// A page of cleaned records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub data: Vec<RecordRow>,
    /// Rows matching the search, across all pages.
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
}
