//! Turns uploaded AE report files into canonical [`AeRecord`]s.
//!
//! [`AeRecord`]: pvsignal_core::AeRecord

pub mod columns;
pub mod normalizer;
pub mod severity;

pub use columns::{CanonicalColumn, ColumnMap};
pub use normalizer::{normalize, NormalizeOptions, NormalizationReport, NormalizedDataset};
pub use severity::map_severity;
