//! Per-cluster signal metrics.
//!
//! `signal_score = frequency × severity × growth_rate`, where severity is the
//! mean member ordinal and growth compares report counts in two equal-length
//! windows ending at the latest report date of the whole dataset.

use chrono::{Duration, NaiveDate};
use tracing::debug;

use pvsignal_core::config::ScoringConfig;
use pvsignal_core::{AeRecord, ClusterMetrics, Severity};

use crate::error::InsightError;
use crate::types::{Cluster, Clustering, SignalOverview};

/// Composite score. Non-decreasing in each argument for non-negative inputs.
pub fn signal_score(frequency: usize, severity: f64, growth_rate: f64) -> f64 {
    frequency as f64 * severity * growth_rate
}

/// Recent `(ref − W, ref]` and baseline `(ref − 2W, ref − W]` windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthWindow {
    reference: Option<NaiveDate>,
    window_days: i64,
}

impl GrowthWindow {
    /// Anchor the windows at the latest report date among `records`.
    pub fn from_records(records: &[AeRecord], window_days: i64) -> Self {
        Self {
            reference: records.iter().filter_map(|r| r.report_date).max(),
            window_days,
        }
    }

    pub fn reference(&self) -> Option<NaiveDate> {
        self.reference
    }

    /// Growth rate over `dates` and whether it is the undefined-baseline sentinel.
    pub fn growth<I>(&self, dates: I) -> (f64, bool)
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        let Some(reference) = self.reference else {
            return (1.0, true);
        };
        let window = Duration::days(self.window_days);
        let recent_start = reference.checked_sub_signed(window).unwrap_or(NaiveDate::MIN);
        let baseline_start = recent_start
            .checked_sub_signed(window)
            .unwrap_or(NaiveDate::MIN);

        let (mut recent, mut baseline) = (0usize, 0usize);
        for date in dates {
            if date > recent_start && date <= reference {
                recent += 1;
            } else if date > baseline_start && date <= recent_start {
                baseline += 1;
            }
        }

        if baseline == 0 {
            (1.0, true)
        } else {
            (recent as f64 / baseline as f64, false)
        }
    }
}

/// Computes [`ClusterMetrics`] for the clusters of one dataset.
#[derive(Debug, Clone)]
pub struct SignalScorer {
    window_days: i64,
}

impl SignalScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self::with_window(config.growth_window_days)
    }

    pub fn with_window(window_days: i64) -> Self {
        Self {
            window_days: window_days.max(1),
        }
    }

    /// Score one cluster. An empty cluster or an out-of-range member index is
    /// an invariant violation and yields [`InsightError::Scoring`].
    pub fn score_cluster(
        &self,
        cluster: &Cluster,
        records: &[AeRecord],
        window: &GrowthWindow,
    ) -> Result<ClusterMetrics, InsightError> {
        if cluster.members.is_empty() {
            return Err(InsightError::Scoring(format!(
                "cluster {} has no members",
                cluster.cluster_id
            )));
        }

        let mut members = Vec::with_capacity(cluster.members.len());
        for &m in &cluster.members {
            let record = records.get(m).ok_or_else(|| {
                InsightError::Scoring(format!(
                    "cluster {} references record {} of {}",
                    cluster.cluster_id,
                    m,
                    records.len()
                ))
            })?;
            members.push(record);
        }

        let frequency = members.len();
        let severity = (members.iter().map(|r| r.severity.as_f64()).sum::<f64>()
            / frequency as f64)
            .clamp(Severity::MIN as f64, Severity::MAX as f64);
        let (growth_rate, growth_undefined) =
            window.growth(members.iter().filter_map(|r| r.report_date));

        Ok(ClusterMetrics {
            cluster_id: cluster.cluster_id,
            frequency,
            severity,
            growth_rate,
            growth_undefined,
            signal_score: signal_score(frequency, severity, growth_rate),
        })
    }

    /// Score every cluster, in ascending cluster id order.
    pub fn score_all(
        &self,
        clustering: &Clustering,
        records: &[AeRecord],
    ) -> Result<Vec<ClusterMetrics>, InsightError> {
        let window = GrowthWindow::from_records(records, self.window_days);
        debug!(reference = ?window.reference(), window_days = self.window_days, "Scoring clusters");

        clustering
            .clusters
            .iter()
            .map(|c| self.score_cluster(c, records, &window))
            .collect()
    }
}

impl Default for SignalScorer {
    fn default() -> Self {
        Self::new(&ScoringConfig::default())
    }
}

/// Aggregate statistics over all cluster metrics.
pub fn overview(metrics: &[ClusterMetrics], high_priority_threshold: f64) -> SignalOverview {
    if metrics.is_empty() {
        return SignalOverview::default();
    }
    let n = metrics.len() as f64;
    let mean = |f: fn(&ClusterMetrics) -> f64| Some(metrics.iter().map(f).sum::<f64>() / n);

    SignalOverview {
        total_signals: metrics.len(),
        mean_score: mean(|m| m.signal_score),
        max_score: metrics.iter().map(|m| m.signal_score).reduce(f64::max),
        min_score: metrics.iter().map(|m| m.signal_score).reduce(f64::min),
        high_priority: metrics
            .iter()
            .filter(|m| m.signal_score > high_priority_threshold)
            .count(),
        mean_growth_rate: mean(|m| m.growth_rate),
        mean_severity: mean(|m| m.severity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(severity: u8, date: Option<(i32, u32, u32)>) -> AeRecord {
        AeRecord {
            report_id: "r".to_string(),
            drug_name: "Aspirin".to_string(),
            adverse_event_term: "Nausea".to_string(),
            report_date: date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            severity: Severity::new(severity).unwrap(),
            raw_text: String::new(),
            label: None,
        }
    }

    fn whole(records: &[AeRecord]) -> Cluster {
        Cluster {
            cluster_id: 0,
            members: (0..records.len()).collect(),
        }
    }

    #[test]
    fn test_frequency_78_scores_exactly() {
        let records: Vec<AeRecord> = (0..78).map(|_| record(1, None)).collect();
        let scorer = SignalScorer::default();
        let window = GrowthWindow::from_records(&records, 90);
        let m = scorer.score_cluster(&whole(&records), &records, &window).unwrap();
        assert_eq!(m.frequency, 78);
        assert_eq!(m.severity, 1.0);
        assert_eq!(m.growth_rate, 1.0);
        assert_eq!(m.signal_score, 78.0);
    }

    #[test]
    fn test_severity_is_mean() {
        let records = vec![record(1, None), record(3, None), record(5, None), record(3, None)];
        let m = SignalScorer::default()
            .score_cluster(&whole(&records), &records, &GrowthWindow::from_records(&records, 90))
            .unwrap();
        assert_eq!(m.severity, 3.0);
        assert_eq!(m.signal_score, 12.0);
    }

    #[test]
    fn test_growth_windows() {
        // Reference 2024-06-30, W = 30: recent (05-31, 06-30], baseline (05-01, 05-31].
        let records = vec![
            record(1, Some((2024, 6, 30))),
            record(1, Some((2024, 6, 1))),
            record(1, Some((2024, 6, 15))),
            record(1, Some((2024, 5, 31))),
            record(1, Some((2024, 5, 2))),
            record(1, Some((2024, 5, 1))), // outside both windows
            record(1, None),
        ];
        let window = GrowthWindow::from_records(&records, 30);
        assert_eq!(window.reference(), NaiveDate::from_ymd_opt(2024, 6, 30));
        let m = SignalScorer::with_window(30)
            .score_cluster(&whole(&records), &records, &window)
            .unwrap();
        assert_eq!(m.growth_rate, 1.5);
        assert!(!m.growth_undefined);
        assert_eq!(m.frequency, 7);
    }

    #[test]
    fn test_reference_is_dataset_wide() {
        let records = vec![
            record(1, Some((2024, 1, 10))),
            record(1, Some((2024, 1, 20))),
            record(1, Some((2024, 12, 31))),
        ];
        let window = GrowthWindow::from_records(&records, 90);
        // Cluster of the two January reports: both fall in neither window.
        let cluster = Cluster {
            cluster_id: 0,
            members: vec![0, 1],
        };
        let m = SignalScorer::default()
            .score_cluster(&cluster, &records, &window)
            .unwrap();
        assert!(m.growth_undefined);
        assert_eq!(m.growth_rate, 1.0);
    }

    #[test]
    fn test_zero_baseline_sentinel() {
        let records = vec![record(2, Some((2024, 3, 1))), record(2, Some((2024, 3, 2)))];
        let window = GrowthWindow::from_records(&records, 90);
        let (rate, undefined) = window.growth(records.iter().filter_map(|r| r.report_date));
        assert_eq!(rate, 1.0);
        assert!(undefined);

        let no_dates = GrowthWindow::from_records(&[record(1, None)], 90);
        assert_eq!(no_dates.growth(std::iter::empty()), (1.0, true));
    }

    #[test]
    fn test_declining_growth() {
        let records = vec![
            record(1, Some((2024, 4, 1))),
            record(1, Some((2024, 2, 1))),
            record(1, Some((2024, 2, 2))),
            record(1, Some((2024, 2, 3))),
            record(1, Some((2024, 2, 4))),
        ];
        let (rate, undefined) = GrowthWindow::from_records(&records, 30)
            .growth(records.iter().filter_map(|r| r.report_date));
        // Reference 04-01: recent (03-02, 04-01] = 1, baseline (02-01, 03-02] = 3.
        assert!(!undefined);
        assert!((rate - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_score_monotone_in_each_factor() {
        let base = signal_score(10, 2.0, 1.0);
        assert!(signal_score(11, 2.0, 1.0) >= base);
        assert!(signal_score(10, 2.5, 1.0) >= base);
        assert!(signal_score(10, 2.0, 1.2) >= base);
    }

    #[test]
    fn test_empty_cluster_is_error() {
        let records = vec![record(1, None)];
        let cluster = Cluster {
            cluster_id: 4,
            members: vec![],
        };
        let err = SignalScorer::default()
            .score_cluster(&cluster, &records, &GrowthWindow::from_records(&records, 90))
            .unwrap_err();
        assert!(err.to_string().contains("cluster 4"));
    }

    #[test]
    fn test_out_of_range_member_is_error() {
        let records = vec![record(1, None)];
        let cluster = Cluster {
            cluster_id: 0,
            members: vec![0, 3],
        };
        let result = SignalScorer::default().score_cluster(
            &cluster,
            &records,
            &GrowthWindow::from_records(&records, 90),
        );
        assert!(matches!(result, Err(InsightError::Scoring(_))));
    }

    #[test]
    fn test_score_all_ascending() {
        let records = vec![record(1, None), record(5, None), record(1, None)];
        let clustering = Clustering {
            labels: vec![0, 1, 0],
            clusters: vec![
                Cluster {
                    cluster_id: 0,
                    members: vec![0, 2],
                },
                Cluster {
                    cluster_id: 1,
                    members: vec![1],
                },
            ],
            noise: vec![],
        };
        let metrics = SignalScorer::default().score_all(&clustering, &records).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].cluster_id, 0);
        assert_eq!(metrics[0].signal_score, 2.0);
        assert_eq!(metrics[1].signal_score, 5.0);
    }

    #[test]
    fn test_overview() {
        let m = |id: i32, score: f64| ClusterMetrics {
            cluster_id: id,
            frequency: 1,
            severity: 2.0,
            growth_rate: 1.0,
            growth_undefined: false,
            signal_score: score,
        };
        let o = overview(&[m(0, 10.0), m(1, 60.0), m(2, 80.0)], 50.0);
        assert_eq!(o.total_signals, 3);
        assert_eq!(o.max_score, Some(80.0));
        assert_eq!(o.min_score, Some(10.0));
        assert_eq!(o.mean_score, Some(50.0));
        assert_eq!(o.high_priority, 2);
        assert_eq!(o.mean_severity, Some(2.0));

        let empty = overview(&[], 50.0);
        assert_eq!(empty.total_signals, 0);
        assert_eq!(empty.mean_score, None);
    }
}
