pub mod config;
pub mod error;
pub mod types;

pub use config::PvConfig;
pub use error::{PvError, Result};
pub use types::*;
