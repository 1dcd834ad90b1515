//! Route handler functions for all API endpoints.
//!
//! Read endpoints answer `200` with empty collections (or `null` metrics)
//! while no dataset is loaded.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use pvsignal_core::{ClusterMetrics, DatasetVersion, ProcessingState, SearchField, SummaryOutcome};
use pvsignal_pipeline::{DatasetMetrics, RecordPage, RunReport, SignalSummary};

use crate::error::ApiError;
use crate::state::AppState;

/// Page size of the record listing when the caller does not say.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TopParams {
    pub top_n: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
    #[serde(rename = "type")]
    pub search_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub search: Option<String>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub state: ProcessingState,
    pub processing: bool,
    pub message: String,
    pub dataset_version: Option<DatasetVersion>,
}

/// Run report plus the top signals of the freshly published dataset.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub report: RunReport,
    pub signals: Vec<SignalSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClustersResponse {
    pub clusters: Vec<ClusterMetrics>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignalsResponse {
    pub signals: Vec<ClusterMetrics>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignalSummariesResponse {
    pub signals: Vec<SignalSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SummariesResponse {
    pub summaries: Vec<SummaryOutcome>,
    pub failed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub metrics: Option<DatasetMetrics>,
}

// =============================================================================
// Parameter parsing
// =============================================================================

/// Parse an optional non-negative integer query parameter.
fn parse_count(name: &str, raw: Option<&str>, default: usize) -> Result<usize, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value.parse::<usize>().map_err(|_| {
            ApiError::BadRequest(format!(
                "'{}' must be a non-negative integer, got '{}'",
                name, value
            ))
        }),
    }
}

fn parse_search_type(raw: Option<&str>) -> Result<SearchField, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(SearchField::AdverseEvent),
        Some(value) => SearchField::parse(value).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "unknown search type '{}', expected 'drug' or 'adverse_event'",
                value
            ))
        }),
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "Pharmacovigilance Signal Detection API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let current = state.pipeline.get_status();
    let message = match &current {
        ProcessingState::Idle => "No dataset loaded".to_string(),
        ProcessingState::Running { stage } => format!("Processing: {}", stage),
        ProcessingState::Ready { .. } => "Ready".to_string(),
        ProcessingState::Failed { reason } => reason.clone(),
    };
    // Still set while a follow-up run is in flight.
    let dataset_version = state.pipeline.snapshot().map(|s| s.version);
    Json(StatusResponse {
        processing: current.is_running(),
        state: current,
        message,
        dataset_version,
    })
}

/// POST /api/upload - run the pipeline over a raw CSV body and answer with
/// the top signals of the new dataset.
pub async fn upload(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("request body is empty".to_string()));
    }
    let report = state.pipeline.ingest(body.to_vec()).await?;
    let signals = if report.published {
        state
            .pipeline
            .get_signals(state.config.summary.default_top_n)
            .await
    } else {
        Vec::new()
    };
    Ok(Json(UploadResponse { report, signals }))
}

/// POST /api/reset
pub async fn reset(State(state): State<AppState>) -> Json<ResetResponse> {
    state.pipeline.reset();
    Json(ResetResponse {
        success: true,
        message: "Application state reset successfully".to_string(),
    })
}

/// GET /api/clusters
pub async fn clusters(State(state): State<AppState>) -> Json<ClustersResponse> {
    Json(ClustersResponse {
        clusters: state.pipeline.get_clusters(),
    })
}

/// GET /api/signals/top?top_n=
pub async fn top_signals(
    State(state): State<AppState>,
    Query(params): Query<TopParams>,
) -> Result<Json<SignalsResponse>, ApiError> {
    let n = parse_count("top_n", params.top_n.as_deref(), state.config.summary.default_top_n)?;
    Ok(Json(SignalsResponse {
        signals: state.pipeline.get_top_signals(n),
    }))
}

/// GET /api/signals?top_n= - top clusters with their summaries.
pub async fn signals(
    State(state): State<AppState>,
    Query(params): Query<TopParams>,
) -> Result<Json<SignalSummariesResponse>, ApiError> {
    let n = parse_count("top_n", params.top_n.as_deref(), state.config.summary.default_top_n)?;
    Ok(Json(SignalSummariesResponse {
        signals: state.pipeline.get_signals(n).await,
    }))
}

/// GET /api/signals/summaries?top_n=
pub async fn summaries(
    State(state): State<AppState>,
    Query(params): Query<TopParams>,
) -> Result<Json<SummariesResponse>, ApiError> {
    let n = parse_count("top_n", params.top_n.as_deref(), state.config.summary.default_top_n)?;
    let summaries = state.pipeline.get_summaries(n).await;
    let failed = summaries.iter().filter(|s| !s.is_ready()).count();
    Ok(Json(SummariesResponse { summaries, failed }))
}

/// GET /api/clusters/search?query=&type=
pub async fn search_clusters(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ClustersResponse>, ApiError> {
    let field = parse_search_type(params.search_type.as_deref())?;
    let query = params.query.unwrap_or_default();
    Ok(Json(ClustersResponse {
        clusters: state.pipeline.search_clusters(&query, field),
    }))
}

/// GET /api/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        metrics: state.pipeline.get_metrics(),
    })
}

/// GET /api/data/cleaned?page=&limit=&search=
pub async fn cleaned_records(
    State(state): State<AppState>,
    Query(params): Query<RecordParams>,
) -> Result<Json<RecordPage>, ApiError> {
    let page = parse_count("page", params.page.as_deref(), 1)?;
    let limit = parse_count("limit", params.limit.as_deref(), DEFAULT_PAGE_LIMIT)?;
    Ok(Json(state.pipeline.records(
        page,
        limit,
        params.search.as_deref(),
    )))
}
