//! Pipeline coordination: runs uploads through every stage, owns the
//! published dataset snapshot and serves consistent reads from it.

pub mod coordinator;
pub mod snapshot;
pub mod state;

pub use coordinator::{RunReport, SignalPipeline, MAX_PAGE_LIMIT};
pub use snapshot::{DatasetMetrics, DatasetSnapshot, RecordPage, RecordRow, SignalSummary};
pub use state::StateTracker;
