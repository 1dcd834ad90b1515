//! HTTP surface for the signal pipeline: upload, status, cluster and signal
//! reads, summaries, metrics and the cleaned-record listing.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
