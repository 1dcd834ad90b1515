//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
///
/// Uploads may be as large as `general.max_upload_mb`.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let body_limit = state.config.general.max_upload_mb.saturating_mul(1024 * 1024);

    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/upload", post(handlers::upload))
        .route("/reset", post(handlers::reset))
        .route("/clusters", get(handlers::clusters))
        .route("/clusters/search", get(handlers::search_clusters))
        .route("/signals", get(handlers::signals))
        .route("/signals/top", get(handlers::top_signals))
        .route("/signals/summaries", get(handlers::summaries))
        .route("/metrics", get(handlers::metrics))
        .route("/data/cleaned", get(handlers::cleaned_records));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

