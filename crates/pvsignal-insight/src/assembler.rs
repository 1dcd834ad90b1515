//! Summary assembly: payload construction and isolated, bounded summarizer
//! calls.
//!
//! Each top cluster gets one summarizer call. At most `max_concurrency` calls
//! run at once and each is bounded by `timeout`. A failure, a timeout or a
//! cancellation only affects its own cluster. The output keeps input order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

use pvsignal_core::config::SummaryConfig;
use pvsignal_core::{AeRecord, ClusterMetrics, DatasetVersion, Summary, SummaryOutcome};

use crate::summarizer::{Summarizer, SummarizerError};
use crate::types::{Cluster, SummaryPayload};

/// The `k` most frequent adverse event terms among `members`, ties broken by
/// first appearance in record order.
pub fn top_adverse_events(members: &[usize], records: &[AeRecord], k: usize) -> Vec<String> {
    // term -> (count, first position)
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, record) in members.iter().filter_map(|&m| records.get(m)).enumerate() {
        counts
            .entry(record.adverse_event_term.as_str())
            .or_insert((0, position))
            .0 += 1;
    }

    let mut ranked: Vec<(&str, usize, usize)> =
        counts.into_iter().map(|(t, (c, first))| (t, c, first)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(k).map(|(t, _, _)| t.to_string()).collect()
}

pub fn build_payload(
    metrics: &ClusterMetrics,
    cluster: &Cluster,
    records: &[AeRecord],
    top_k_events: usize,
) -> SummaryPayload {
    SummaryPayload {
        cluster_id: metrics.cluster_id,
        frequency: metrics.frequency,
        severity: metrics.severity,
        growth_rate: metrics.growth_rate,
        growth_undefined: metrics.growth_undefined,
        signal_score: metrics.signal_score,
        top_adverse_events: top_adverse_events(&cluster.members, records, top_k_events),
    }
}

/// Runs a batch of summarizer calls with bounded concurrency.
#[derive(Clone)]
pub struct SummaryAssembler {
    summarizer: Arc<dyn Summarizer>,
    max_concurrency: usize,
    timeout: Duration,
}

impl SummaryAssembler {
    pub fn new(summarizer: Arc<dyn Summarizer>, max_concurrency: usize, timeout: Duration) -> Self {
        Self {
            summarizer,
            max_concurrency: max_concurrency.max(1),
            timeout,
        }
    }

    pub fn from_config(summarizer: Arc<dyn Summarizer>, config: &SummaryConfig) -> Self {
        Self::new(
            summarizer,
            config.max_concurrency,
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn summarizer_name(&self) -> &str {
        self.summarizer.name()
    }

    /// Summarize every payload, returning one outcome per payload in input order.
    ///
    /// `generation` carries the coordinator's dataset generation; any value
    /// sent after the receiver was created cancels the calls still in flight.
    pub async fn summarize_all(
        &self,
        payloads: Vec<SummaryPayload>,
        version: DatasetVersion,
        generation: watch::Receiver<u64>,
    ) -> Vec<SummaryOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let handles: Vec<_> = payloads
            .into_iter()
            .map(|payload| {
                let summarizer = Arc::clone(&self.summarizer);
                let semaphore = Arc::clone(&semaphore);
                let mut generation = generation.clone();
                let timeout = self.timeout;
                let cluster_id = payload.cluster_id;

                let handle = tokio::spawn(async move {
                    let call = async {
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(e) => return Err(SummarizerError::Unavailable(e.to_string())),
                        };
                        match tokio::time::timeout(timeout, summarizer.summarize(&payload)).await {
                            Ok(result) => result,
                            Err(_) => Err(SummarizerError::Timeout(timeout.as_millis() as u64)),
                        }
                    };
                    let cancelled = async {
                        if generation.changed().await.is_err() {
                            // Sender gone: nothing can cancel this batch any more.
                            std::future::pending::<()>().await;
                        }
                    };

                    let result = tokio::select! {
                        r = call => r,
                        _ = cancelled => Err(SummarizerError::Cancelled),
                    };
                    finish(payload, version, result)
                });
                (cluster_id, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (cluster_id, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| {
                SummaryOutcome::failed(cluster_id, format!("summary task failed: {}", e))
            });
            outcomes.push(outcome);
        }

        let failed = outcomes.iter().filter(|o| !o.is_ready()).count();
        debug!(
            version,
            total = outcomes.len(),
            failed,
            summarizer = self.summarizer.name(),
            "Summary batch finished"
        );
        outcomes
    }
}

fn finish(
    payload: SummaryPayload,
    version: DatasetVersion,
    result: Result<String, SummarizerError>,
) -> SummaryOutcome {
    let result = result.and_then(|text| {
        let text = text.trim().to_string();
        if text.is_empty() {
            Err(SummarizerError::EmptyText)
        } else {
            Ok(text)
        }
    });

    match result {
        Ok(text) => SummaryOutcome::Ready(Summary {
            cluster_id: payload.cluster_id,
            metrics: payload.metrics(),
            text,
            top_adverse_events: payload.top_adverse_events,
            dataset_version: version,
            generated_at: Utc::now(),
        }),
        Err(e) => {
            warn!(cluster_id = payload.cluster_id, error = %e, "Summary generation failed");
            SummaryOutcome::failed(payload.cluster_id, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::TemplateSummarizer;
    use async_trait::async_trait;
    use pvsignal_core::Severity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(event: &str) -> AeRecord {
        AeRecord {
            report_id: "r".to_string(),
            drug_name: "Aspirin".to_string(),
            adverse_event_term: event.to_string(),
            report_date: None,
            severity: Severity::MILD,
            raw_text: String::new(),
            label: None,
        }
    }

    fn payload(cluster_id: i32) -> SummaryPayload {
        SummaryPayload {
            cluster_id,
            frequency: 3,
            severity: 1.0,
            growth_rate: 1.0,
            growth_undefined: true,
            signal_score: 3.0,
            top_adverse_events: vec!["Nausea".to_string()],
        }
    }

    /// Sleeps far past any test timeout for one cluster id.
    struct SlowFor(i32);

    #[async_trait]
    impl Summarizer for SlowFor {
        async fn summarize(&self, payload: &SummaryPayload) -> Result<String, SummarizerError> {
            if payload.cluster_id == self.0 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(format!("summary of {}", payload.cluster_id))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    /// Tracks the peak number of concurrent calls.
    struct Counting {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for Counting {
        async fn summarize(&self, _payload: &SummaryPayload) -> Result<String, SummarizerError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok("ok".to_string())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct Blank;

    #[async_trait]
    impl Summarizer for Blank {
        async fn summarize(&self, _payload: &SummaryPayload) -> Result<String, SummarizerError> {
            Ok("   ".to_string())
        }

        fn name(&self) -> &str {
            "blank"
        }
    }

    #[test]
    fn test_top_events_by_count_then_first_appearance() {
        let records = vec![
            record("Rash"),
            record("Nausea"),
            record("Headache"),
            record("Nausea"),
            record("Rash"),
            record("Dizziness"),
        ];
        let members: Vec<usize> = (0..records.len()).collect();
        assert_eq!(
            top_adverse_events(&members, &records, 3),
            vec!["Rash", "Nausea", "Headache"]
        );
        assert_eq!(top_adverse_events(&members, &records, 10).len(), 4);
        assert!(top_adverse_events(&[], &records, 5).is_empty());
    }

    #[test]
    fn test_build_payload_copies_metrics() {
        let records = vec![record("Nausea"), record("Nausea")];
        let cluster = Cluster {
            cluster_id: 7,
            members: vec![0, 1],
        };
        let metrics = ClusterMetrics {
            cluster_id: 7,
            frequency: 2,
            severity: 1.5,
            growth_rate: 2.0,
            growth_undefined: false,
            signal_score: 6.0,
        };
        let p = build_payload(&metrics, &cluster, &records, 5);
        assert_eq!(p.metrics(), metrics);
        assert_eq!(p.top_adverse_events, vec!["Nausea"]);
    }

    #[tokio::test]
    async fn test_one_timeout_does_not_abort_batch() {
        let assembler = SummaryAssembler::new(Arc::new(SlowFor(12)), 4, Duration::from_millis(100));
        let (_tx, rx) = watch::channel(0u64);
        let payloads = vec![payload(10), payload(11), payload(12), payload(13), payload(14)];

        let outcomes = assembler.summarize_all(payloads, 1, rx).await;

        assert_eq!(outcomes.len(), 5);
        let ids: Vec<i32> = outcomes.iter().map(|o| o.cluster_id()).collect();
        assert_eq!(ids, vec![10, 11, 12, 13, 14]);
        assert_eq!(outcomes.iter().filter(|o| o.is_ready()).count(), 4);
        match &outcomes[2] {
            SummaryOutcome::Failed { cluster_id, error } => {
                assert_eq!(*cluster_id, 12);
                assert!(error.starts_with("Summarization failed for cluster 12"));
                assert!(error.contains("timed out"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        let ready = outcomes[0].summary().unwrap();
        assert_eq!(ready.text, "summary of 10");
        assert_eq!(ready.dataset_version, 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let counting = Arc::new(Counting {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let assembler = SummaryAssembler::new(counting.clone(), 2, Duration::from_secs(5));
        let (_tx, rx) = watch::channel(0u64);

        let outcomes = assembler
            .summarize_all((0..6).map(payload).collect(), 1, rx)
            .await;

        assert!(outcomes.iter().all(|o| o.is_ready()));
        assert!(counting.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_generation_change_cancels_in_flight() {
        let assembler = SummaryAssembler::new(Arc::new(SlowFor(1)), 4, Duration::from_secs(30));
        let (tx, rx) = watch::channel(5u64);

        let batch = tokio::spawn({
            let assembler = assembler.clone();
            async move { assembler.summarize_all(vec![payload(0), payload(1)], 1, rx).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(6).unwrap();

        let outcomes = batch.await.unwrap();
        assert!(outcomes[0].is_ready());
        match &outcomes[1] {
            SummaryOutcome::Failed { error, .. } => assert!(error.contains("cancelled")),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blank_text_is_failure() {
        let assembler = SummaryAssembler::new(Arc::new(Blank), 1, Duration::from_secs(1));
        let (_tx, rx) = watch::channel(0u64);
        let outcomes = assembler.summarize_all(vec![payload(3)], 1, rx).await;
        assert!(!outcomes[0].is_ready());
    }

    #[tokio::test]
    async fn test_template_summarizer_batch() {
        let assembler = SummaryAssembler::from_config(
            Arc::new(TemplateSummarizer::new()),
            &SummaryConfig::default(),
        );
        assert_eq!(assembler.summarizer_name(), "template");
        let (_tx, rx) = watch::channel(0u64);
        let outcomes = assembler.summarize_all(vec![payload(0)], 2, rx).await;
        let summary = outcomes[0].summary().unwrap();
        assert!(summary.text.contains("Nausea"));
        assert_eq!(summary.metrics.signal_score, 3.0);
    }
}
