//! Ranking and lookup over scored clusters. Pure reads.

use std::cmp::Ordering;

use pvsignal_core::{AeRecord, ClusterMetrics, SearchField};

use crate::types::Clustering;

fn by_score_then_id(a: &ClusterMetrics, b: &ClusterMetrics) -> Ordering {
    b.signal_score
        .total_cmp(&a.signal_score)
        .then_with(|| a.cluster_id.cmp(&b.cluster_id))
}

/// At most `n` clusters by descending signal score, ties by ascending id.
pub fn rank(metrics: &[ClusterMetrics], n: usize) -> Vec<ClusterMetrics> {
    let mut ranked = metrics.to_vec();
    ranked.sort_by(by_score_then_id);
    ranked.truncate(n);
    ranked
}

/// Clusters with a member whose `field` contains `query`, case-insensitively,
/// in ascending cluster id order. Blank queries match nothing; noise records
/// are never searched.
pub fn search(
    query: &str,
    field: SearchField,
    clustering: &Clustering,
    records: &[AeRecord],
    metrics: &[ClusterMetrics],
) -> Vec<ClusterMetrics> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let text = |record: &AeRecord| -> String {
        match field {
            SearchField::Drug => record.drug_name.to_lowercase(),
            SearchField::AdverseEvent => record.adverse_event_term.to_lowercase(),
        }
    };

    clustering
        .clusters
        .iter()
        .filter(|c| {
            c.members
                .iter()
                .filter_map(|&m| records.get(m))
                .any(|r| text(r).contains(&needle))
        })
        .filter_map(|c| metrics.iter().find(|m| m.cluster_id == c.cluster_id))
        .cloned()
        .collect()
}
