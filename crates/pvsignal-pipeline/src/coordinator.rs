//! The signal pipeline coordinator.
//!
//! One upload runs normalize → embed → cluster → score as a single forward
//! pass. A run builds its outputs privately and publishes them as one
//! immutable [`DatasetSnapshot`] by swapping an `Arc`, so readers always see
//! a single complete version. A second upload while a run is in flight is
//! rejected with [`PvError::PipelineBusy`]. A run that fails, or whose
//! future is dropped, withdraws the published snapshot and leaves `Failed`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use pvsignal_core::{
    ClusterMetrics, DatasetVersion, ProcessingState, PvConfig, PvError, Result, SearchField, Stage,
    SummaryOutcome,
};
use pvsignal_ingest::{normalize, NormalizationReport, NormalizeOptions};
use pvsignal_insight::{
    build_payload, classification_metrics, cluster, clustering_quality, overview, rank, search,
    top_adverse_events, ClusterParams, InsightError, SignalScorer, Summarizer, SummaryAssembler,
    TemplateSummarizer,
};
use pvsignal_vector::{embed_records, embedder_from_config, DynEmbeddingService};

use crate::snapshot::{DatasetMetrics, DatasetSnapshot, RecordPage, RecordRow, SignalSummary};
use crate::state::StateTracker;

/// Largest page the record listing hands out.
pub const MAX_PAGE_LIMIT: usize = 1_000;

/// Outcome of one [`SignalPipeline::ingest`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// `None` when the run was superseded by a reset before publishing.
    pub version: Option<DatasetVersion>,
    pub records: usize,
    pub clusters: usize,
    pub noise: usize,
    pub normalization: NormalizationReport,
    pub elapsed_ms: u64,
    pub published: bool,
}

/// Fails its run when dropped while still armed, so an `ingest` future that
/// is abandoned mid-run never leaves the state stuck in `Running`.
struct RunGuard<'a> {
    pipeline: &'a SignalPipeline,
    generation: u64,
    armed: bool,
}

impl<'a> RunGuard<'a> {
    fn new(pipeline: &'a SignalPipeline, generation: u64) -> Self {
        Self {
            pipeline,
            generation,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed
            && self
                .pipeline
                .fail_run(self.generation, "pipeline run abandoned before completion".to_string())
        {
            warn!(generation = self.generation, "Pipeline run abandoned");
        }
    }
}

/// Owns the current dataset snapshot and the processing state.
pub struct SignalPipeline {
    config: PvConfig,
    embedder: Arc<dyn DynEmbeddingService>,
    assembler: SummaryAssembler,
    run_lock: Mutex<()>,
    snapshot: RwLock<Option<Arc<DatasetSnapshot>>>,
    state: StateTracker,
    next_version: AtomicU64,
}

impl SignalPipeline {
    pub fn new(
        config: PvConfig,
        embedder: Arc<dyn DynEmbeddingService>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let assembler = SummaryAssembler::from_config(summarizer, &config.summary);
        Self {
            config,
            embedder,
            assembler,
            run_lock: Mutex::new(()),
            snapshot: RwLock::new(None),
            state: StateTracker::new(),
            next_version: AtomicU64::new(0),
        }
    }

    /// Build a pipeline with the configured embedder and the template summarizer.
    pub fn from_config(config: PvConfig) -> Result<Self> {
        config.validate()?;
        let embedder = embedder_from_config(&config.embedding)?;
        info!(
            backend = %config.embedding.backend,
            dimensions = embedder.dimensions(),
            method = config.clustering.method.as_str(),
            "Signal pipeline configured"
        );
        Ok(Self::new(config, embedder, Arc::new(TemplateSummarizer::new())))
    }

    pub fn config(&self) -> &PvConfig {
        &self.config
    }

    pub fn summarizer_name(&self) -> &str {
        self.assembler.summarizer_name()
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Option<Arc<DatasetSnapshot>>> {
        self.snapshot.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Option<Arc<DatasetSnapshot>>> {
        self.snapshot.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The published snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<DatasetSnapshot>> {
        self.read_slot().clone()
    }

    /// Run the full pipeline over an uploaded file and publish the result.
    ///
    /// Returns [`PvError::PipelineBusy`] immediately when another run holds
    /// the pipeline. The previous snapshot stays readable while the run is in
    /// flight. Any stage error withdraws it and moves the state to `Failed`,
    /// as does dropping the returned future before it completes.
    pub async fn ingest(&self, bytes: Vec<u8>) -> Result<RunReport> {
        let _guard = self.run_lock.try_lock().map_err(|_| {
            warn!("Upload rejected: a pipeline run is already in progress");
            PvError::PipelineBusy
        })?;

        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id, bytes = bytes.len());
        async move {
            let started = Instant::now();
            let generation = self.state.begin_run();
            let mut run = RunGuard::new(self, generation);
            info!("Pipeline run started");

            let outcome = self.execute(bytes, run_id, generation, started).await;
            run.disarm();
            if let Err(e) = &outcome {
                if self.fail_run(generation, e.to_string()) {
                    warn!(error = %e, "Pipeline run failed");
                } else {
                    debug!(error = %e, "Superseded run failed");
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Move a run to `Failed` and withdraw the published snapshot with it.
    /// Returns `false` when the run had already gone stale.
    fn fail_run(&self, generation: u64, reason: String) -> bool {
        let mut slot = self.write_slot();
        if !self.state.fail(generation, reason) {
            return false;
        }
        if let Some(withdrawn) = slot.take() {
            debug!(version = withdrawn.version, "Withdrew snapshot of failed run");
        }
        true
    }

    async fn execute(
        &self,
        bytes: Vec<u8>,
        run_id: Uuid,
        generation: u64,
        started: Instant,
    ) -> Result<RunReport> {
        let discarded = |normalization: NormalizationReport, records: usize| {
            info!("Run superseded by reset, discarding its outputs");
            RunReport {
                run_id,
                version: None,
                records,
                clusters: 0,
                noise: 0,
                normalization,
                elapsed_ms: started.elapsed().as_millis() as u64,
                published: false,
            }
        };

        let options = NormalizeOptions::from(&self.config.ingest);
        let dataset = tokio::task::spawn_blocking(move || normalize(&bytes, &options))
            .await
            .map_err(|e| PvError::from(InsightError::Task(e.to_string())))??;
        let records = dataset.records;
        let normalization = dataset.report;
        info!(
            kept = normalization.kept,
            dropped = normalization.dropped_missing,
            duplicates = normalization.duplicates,
            "Normalized upload"
        );

        if !self.state.advance(generation, Stage::Embedding) {
            return Ok(discarded(normalization, records.len()));
        }
        let embeddings =
            embed_records(self.embedder.as_ref(), &records, self.config.embedding.field).await?;

        if !self.state.advance(generation, Stage::Clustering) {
            return Ok(discarded(normalization, records.len()));
        }
        let params = ClusterParams::from(&self.config.clustering);
        let (embeddings, clustering, quality) = tokio::task::spawn_blocking(move || {
            let clustering = cluster(&embeddings, &params)?;
            let quality = clustering_quality(&embeddings, &clustering);
            Ok::<_, InsightError>((embeddings, clustering, quality))
        })
        .await
        .map_err(|e| PvError::from(InsightError::Task(e.to_string())))??;
        info!(
            clusters = clustering.clusters.len(),
            noise = clustering.noise.len(),
            "Clustered records"
        );

        if !self.state.advance(generation, Stage::Scoring) {
            return Ok(discarded(normalization, records.len()));
        }
        let metrics = SignalScorer::new(&self.config.scoring).score_all(&clustering, &records)?;
        let signals = overview(&metrics, self.config.scoring.high_priority_threshold);
        let classification = classification_metrics(&records, &clustering);

        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        let report = RunReport {
            run_id,
            version: Some(version),
            records: records.len(),
            clusters: clustering.clusters.len(),
            noise: clustering.noise.len(),
            normalization: normalization.clone(),
            elapsed_ms: 0,
            published: true,
        };
        let snapshot = Arc::new(DatasetSnapshot::new(
            version,
            run_id,
            records,
            embeddings,
            clustering,
            metrics,
            quality,
            signals,
            classification,
            normalization,
        ));

        {
            let mut slot = self.write_slot();
            if !self.state.publish(generation, version) {
                drop(slot);
                let normalization = snapshot.normalization.clone();
                return Ok(discarded(normalization, snapshot.records.len()));
            }
            *slot = Some(snapshot);
        }

        let report = RunReport {
            elapsed_ms: started.elapsed().as_millis() as u64,
            ..report
        };
        info!(
            version,
            records = report.records,
            clusters = report.clusters,
            elapsed_ms = report.elapsed_ms,
            "Dataset published"
        );
        Ok(report)
    }

    /// Every cluster's metrics in ascending cluster id order.
    pub fn get_clusters(&self) -> Vec<ClusterMetrics> {
        self.snapshot().map(|s| s.metrics.clone()).unwrap_or_default()
    }

    /// At most `n` clusters by descending signal score.
    pub fn get_top_signals(&self, n: usize) -> Vec<ClusterMetrics> {
        self.snapshot()
            .map(|s| rank(&s.metrics, n))
            .unwrap_or_default()
    }

    pub fn search_clusters(&self, query: &str, field: SearchField) -> Vec<ClusterMetrics> {
        self.snapshot()
            .map(|s| search(query, field, &s.clustering, &s.records, &s.metrics))
            .unwrap_or_default()
    }

    /// The published snapshot plus a receiver for later generation bumps.
    fn pin_snapshot(&self) -> Option<(Arc<DatasetSnapshot>, watch::Receiver<u64>)> {
        // Subscribing under the read lock ties the receiver to this snapshot:
        // publish, fail and reset bump the generation only under the write lock.
        let slot = self.read_slot();
        let snapshot = Arc::clone(slot.as_ref()?);
        Some((snapshot, self.state.subscribe()))
    }

    /// Summaries for the top `n` clusters, in rank order.
    ///
    /// Summaries already generated for the current snapshot are reused, and
    /// concurrent calls wait for each other rather than both generating. A
    /// cluster whose call fails yields [`SummaryOutcome::Failed`] without
    /// affecting the rest. Calls still running when the dataset is replaced or
    /// reset are cancelled.
    pub async fn get_summaries(&self, n: usize) -> Vec<SummaryOutcome> {
        let Some((snapshot, generation)) = self.pin_snapshot() else {
            return Vec::new();
        };
        let top = rank(&snapshot.metrics, n);
        self.summarize_ranked(&snapshot, &top, generation).await
    }

    /// The top `n` clusters with their metrics, top adverse events and
    /// summary text, all taken from one snapshot.
    pub async fn get_signals(&self, n: usize) -> Vec<SignalSummary> {
        let Some((snapshot, generation)) = self.pin_snapshot() else {
            return Vec::new();
        };
        let top = rank(&snapshot.metrics, n);
        let outcomes = self.summarize_ranked(&snapshot, &top, generation).await;

        top.into_iter()
            .zip(outcomes)
            .map(|(metrics, outcome)| {
                let events = snapshot
                    .clustering
                    .cluster(metrics.cluster_id)
                    .map(|c| {
                        top_adverse_events(
                            &c.members,
                            &snapshot.records,
                            self.config.summary.top_k_events,
                        )
                    })
                    .unwrap_or_default();
                let (summary, error) = match outcome {
                    SummaryOutcome::Ready(summary) => (Some(summary.text), None),
                    SummaryOutcome::Failed { error, .. } => (None, Some(error)),
                };
                SignalSummary {
                    metrics,
                    top_adverse_events: events,
                    summary,
                    error,
                }
            })
            .collect()
    }

    /// One outcome per entry of `top`, in order.
    async fn summarize_ranked(
        &self,
        snapshot: &DatasetSnapshot,
        top: &[ClusterMetrics],
        generation: watch::Receiver<u64>,
    ) -> Vec<SummaryOutcome> {
        let _batch = snapshot.summary_gate().await;
        let mut outcomes: Vec<Option<SummaryOutcome>> = Vec::with_capacity(top.len());
        let mut pending = Vec::new();
        for metrics in top {
            if let Some(summary) = snapshot.cached_summary(metrics.cluster_id) {
                outcomes.push(Some(SummaryOutcome::Ready(summary)));
                continue;
            }
            match snapshot.clustering.cluster(metrics.cluster_id) {
                Some(cluster) => {
                    pending.push(build_payload(
                        metrics,
                        cluster,
                        &snapshot.records,
                        self.config.summary.top_k_events,
                    ));
                    outcomes.push(None);
                }
                None => outcomes.push(Some(SummaryOutcome::failed(
                    metrics.cluster_id,
                    "cluster not found in snapshot",
                ))),
            }
        }

        let cached = top.len() - pending.len();
        debug!(
            version = snapshot.version,
            requested = top.len(),
            cached,
            generating = pending.len(),
            "Assembling summaries"
        );

        let fresh = if pending.is_empty() {
            Vec::new()
        } else {
            self.assembler
                .summarize_all(pending, snapshot.version, generation)
                .await
        };
        for outcome in &fresh {
            if let Some(summary) = outcome.summary() {
                snapshot.cache_summary(summary.clone());
            }
        }

        let mut fresh = fresh.into_iter();
        outcomes
            .into_iter()
            .filter_map(|slot| slot.or_else(|| fresh.next()))
            .collect()
    }

    pub fn get_status(&self) -> ProcessingState {
        self.state.current()
    }

    /// Drop the current snapshot, return to `Idle` and cancel in-flight
    /// summaries. A run still in progress finishes without publishing.
    pub fn reset(&self) {
        let mut slot = self.write_slot();
        let previous = slot.take().map(|s| s.version);
        self.state.reset();
        info!(?previous, "Pipeline reset");
    }

    pub fn get_metrics(&self) -> Option<DatasetMetrics> {
        self.snapshot().map(|s| DatasetMetrics::from(s.as_ref()))
    }

    /// One page of cleaned records with their cluster labels.
    ///
    /// `page` is 1-based (0 reads as 1) and `limit` is clamped to
    /// `1..=MAX_PAGE_LIMIT`. A non-blank `search` keeps rows where any text
    /// field contains it, case-insensitively.
    pub fn records(&self, page: usize, limit: usize, search: Option<&str>) -> RecordPage {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let Some(snapshot) = self.snapshot() else {
            return RecordPage {
                page,
                limit,
                ..Default::default()
            };
        };

        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let matching: Vec<usize> = snapshot
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| match &needle {
                None => true,
                Some(needle) => [
                    r.report_id.as_str(),
                    r.drug_name.as_str(),
                    r.adverse_event_term.as_str(),
                    r.raw_text.as_str(),
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(needle.as_str())),
            })
            .map(|(i, _)| i)
            .collect();

        let total = matching.len();
        let data = matching
            .iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .filter_map(|&i| {
                Some(RecordRow {
                    record: snapshot.records.get(i)?.clone(),
                    cluster_id: snapshot.cluster_of(i)?,
                })
            })
            .collect();

        RecordPage {
            data,
            total,
            page,
            limit,
            pages: total.div_ceil(limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
drug_name,adverse_event,severity,report_date
Aspirin,Nausea,mild,2024-01-05
Aspirin,Nausea,moderate,2024-01-06
Aspirin,Nausea,mild,2024-01-07
Warfarin,Bleeding,severe,2024-01-08
Warfarin,Bleeding,severe,2024-01-09
Warfarin,Bleeding,life-threatening,2024-01-10
Zolpidem,Somnambulism,mild,2024-01-11
";

    fn pipeline() -> SignalPipeline {
        SignalPipeline::from_config(PvConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_publishes_version_one() {
        let p = pipeline();
        let report = p.ingest(CSV.as_bytes().to_vec()).await.unwrap();
        assert!(report.published);
        assert_eq!(report.version, Some(1));
        assert_eq!(report.records, 7);
        assert_eq!(report.clusters, 2);
        assert_eq!(report.noise, 1);
        assert_eq!(p.get_status(), ProcessingState::Ready { version: 1 });
        assert_eq!(p.get_clusters().len(), 2);
    }

    #[tokio::test]
    async fn test_records_paging_and_search() {
        let p = pipeline();
        assert_eq!(p.records(1, 10, None).total, 0);
        p.ingest(CSV.as_bytes().to_vec()).await.unwrap();

        let page = p.records(2, 3, None);
        assert_eq!(page.total, 7);
        assert_eq!(page.pages, 3);
        assert_eq!(page.data.len(), 3);
        assert_eq!(page.data[0].record.drug_name, "Warfarin");

        let found = p.records(1, 100, Some("  SOMNAMB "));
        assert_eq!(found.total, 1);
        assert_eq!(found.data[0].cluster_id, pvsignal_core::NOISE_CLUSTER_ID);

        let clamped = p.records(0, 0, None);
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.limit, 1);
    }

    #[tokio::test]
    async fn test_metrics_reflect_snapshot() {
        let p = pipeline();
        assert!(p.get_metrics().is_none());
        p.ingest(CSV.as_bytes().to_vec()).await.unwrap();
        let metrics = p.get_metrics().unwrap();
        assert_eq!(metrics.version, 1);
        assert_eq!(metrics.total_records, 7);
        assert_eq!(metrics.clustering.n_clusters, 2);
        assert_eq!(metrics.signals.total_signals, 2);
        assert!(metrics.classification.is_none());
    }
}
