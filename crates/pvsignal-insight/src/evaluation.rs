//! Cluster-majority classification against ground-truth labels.

use std::collections::HashMap;

use pvsignal_core::AeRecord;

use crate::types::{ClassificationMetrics, Clustering};

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Predict each record's label as the majority label of its cluster (noise
/// forms one group of its own; ties predict 0) and score the predictions
/// with label 1 as the positive class.
///
/// Returns `None` unless every record carries a label.
pub fn classification_metrics(
    records: &[AeRecord],
    clustering: &Clustering,
) -> Option<ClassificationMetrics> {
    if records.is_empty() || clustering.labels.len() != records.len() {
        return None;
    }
    let truth: Vec<u8> = records.iter().map(|r| r.label).collect::<Option<_>>()?;

    // (negatives, positives) per cluster label.
    let mut votes: HashMap<i32, (usize, usize)> = HashMap::new();
    for (&group, &label) in clustering.labels.iter().zip(&truth) {
        let entry = votes.entry(group).or_default();
        if label == 1 {
            entry.1 += 1;
        } else {
            entry.0 += 1;
        }
    }

    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for (group, &actual) in clustering.labels.iter().zip(&truth) {
        let (neg, pos) = votes.get(group).copied().unwrap_or_default();
        let predicted = u8::from(pos > neg);
        match (predicted, actual == 1) {
            (1, true) => tp += 1,
            (1, false) => fp += 1,
            (_, true) => fn_ += 1,
            (_, false) => tn += 1,
        }
    }

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };

    Some(ClassificationMetrics {
        accuracy: round4(ratio(tp + tn, truth.len())),
        precision: round4(precision),
        recall: round4(recall),
        f1_score: round4(f1),
        support: truth.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cluster;
    use pvsignal_core::Severity;

    fn labelled(label: Option<u8>) -> AeRecord {
        AeRecord {
            report_id: "r".to_string(),
            drug_name: "d".to_string(),
            adverse_event_term: "e".to_string(),
            report_date: None,
            severity: Severity::MILD,
            raw_text: String::new(),
            label,
        }
    }

    fn clustering(labels: Vec<i32>) -> Clustering {
        Clustering {
            clusters: vec![Cluster {
                cluster_id: 0,
                members: vec![0],
            }],
            noise: vec![],
            labels,
        }
    }

    #[test]
    fn test_majority_prediction() {
        // Cluster 0: labels 1,1,0 -> predicts 1. Cluster 1: 0,0 -> predicts 0.
        // Noise: 1 alone -> predicts 1.
        let records: Vec<AeRecord> = [1, 1, 0, 0, 0, 1]
            .iter()
            .map(|&l| labelled(Some(l)))
            .collect();
        let m = classification_metrics(&records, &clustering(vec![0, 0, 0, 1, 1, -1])).unwrap();
        // tp = 3, fp = 1, tn = 2, fn = 0
        assert_eq!(m.support, 6);
        assert_eq!(m.accuracy, 0.8333);
        assert_eq!(m.precision, 0.75);
        assert_eq!(m.recall, 1.0);
        assert_eq!(m.f1_score, 0.8571);
    }

    #[test]
    fn test_ties_predict_negative() {
        let records = vec![labelled(Some(1)), labelled(Some(0))];
        let m = classification_metrics(&records, &clustering(vec![0, 0])).unwrap();
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1_score, 0.0);
        assert_eq!(m.accuracy, 0.5);
    }

    #[test]
    fn test_unlabelled_records_yield_none() {
        let records = vec![labelled(Some(1)), labelled(None)];
        assert!(classification_metrics(&records, &clustering(vec![0, 0])).is_none());
        assert!(classification_metrics(&[], &Clustering::default()).is_none());
    }
}
