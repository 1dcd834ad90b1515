//! Application state shared across route handlers.

use std::sync::Arc;
use std::time::Instant;

use pvsignal_core::PvConfig;
use pvsignal_pipeline::SignalPipeline;

/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SignalPipeline>,
    pub config: Arc<PvConfig>,
    /// Server start time for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(pipeline: SignalPipeline) -> Self {
        let config = Arc::new(pipeline.config().clone());
        Self {
            pipeline: Arc::new(pipeline),
            config,
            start_time: Instant::now(),
        }
    }
}
