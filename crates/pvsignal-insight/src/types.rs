use serde::{Deserialize, Serialize};

use pvsignal_core::config::ClusteringConfig;
use pvsignal_core::{ClusterMethod, ClusterMetrics, NOISE_CLUSTER_ID};

/// Clustering knobs. See [`ClusteringConfig`] for field meanings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterParams {
    pub method: ClusterMethod,
    pub eps: f64,
    pub min_points: usize,
    pub min_cluster_size: usize,
    pub k: usize,
    pub max_iterations: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self::from(&ClusteringConfig::default())
    }
}

impl From<&ClusteringConfig> for ClusterParams {
    fn from(config: &ClusteringConfig) -> Self {
        Self {
            method: config.method,
            eps: config.eps,
            min_points: config.min_points,
            min_cluster_size: config.min_cluster_size,
            k: config.k,
            max_iterations: config.max_iterations,
        }
    }
}

/// A group of records the clusterer judged similar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: i32,
    /// Record indices, ascending, never empty.
    pub members: Vec<usize>,
}

/// Output of one clustering run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clustering {
    /// One label per record; [`NOISE_CLUSTER_ID`] for noise.
    pub labels: Vec<i32>,
    /// Ordered by ascending `cluster_id`, ids contiguous from 0.
    pub clusters: Vec<Cluster>,
    /// Noise record indices, ascending.
    pub noise: Vec<usize>,
}

impl Clustering {
    pub fn cluster(&self, cluster_id: i32) -> Option<&Cluster> {
        usize::try_from(cluster_id)
            .ok()
            .and_then(|i| self.clusters.get(i))
            .filter(|c| c.cluster_id == cluster_id)
    }

    pub fn is_noise(&self, record: usize) -> bool {
        self.labels.get(record) == Some(&NOISE_CLUSTER_ID)
    }
}

/// Clustering quality scores. Absent values serialize as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusteringQuality {
    pub n_clusters: usize,
    pub n_noise: usize,
    pub noise_ratio: f64,
    pub silhouette: Option<f64>,
    pub davies_bouldin: Option<f64>,
    pub calinski_harabasz: Option<f64>,
}

/// Aggregate view over every cluster's metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalOverview {
    pub total_signals: usize,
    pub mean_score: Option<f64>,
    pub max_score: Option<f64>,
    pub min_score: Option<f64>,
    pub high_priority: usize,
    pub mean_growth_rate: Option<f64>,
    pub mean_severity: Option<f64>,
}

/// Agreement between cluster-majority predictions and ground-truth labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Fixed input handed to a summarizer for one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub cluster_id: i32,
    pub frequency: usize,
    pub severity: f64,
    pub growth_rate: f64,
    pub growth_undefined: bool,
    pub signal_score: f64,
    pub top_adverse_events: Vec<String>,
}

impl SummaryPayload {
    pub fn metrics(&self) -> ClusterMetrics {
        ClusterMetrics {
            cluster_id: self.cluster_id,
            frequency: self.frequency,
            severity: self.severity,
            growth_rate: self.growth_rate,
            growth_undefined: self.growth_undefined,
            signal_score: self.signal_score,
        }
    }
}
