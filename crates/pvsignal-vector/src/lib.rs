//! Record embedding and vector distance.
//!
//! The default [`HashingEmbedding`] is an exact, deterministic encoder that
//! needs no model files. With the `onnx` feature enabled,
//! [`OnnxEmbeddingService`] runs a sentence-transformer model instead.

pub mod distance;
pub mod embedding;
#[cfg(feature = "onnx")]
pub mod onnx;

pub use distance::{cosine_distance, cosine_similarity};
pub use embedding::{
    embed_records, embedder_from_config, DynEmbeddingService, EmbeddingService, HashingEmbedding,
};
#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbeddingService;
