//! Embedding service trait and the built-in hashing encoder.
//!
//! - `HashingEmbedding` hashes word tokens and character trigrams into a
//!   fixed number of buckets. Deterministic and exact: identical text always
//!   yields an identical vector. This is the default backend.
//! - `OnnxEmbeddingService` (feature `onnx`) runs a sentence-transformer model.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use pvsignal_core::config::EmbeddingConfig;
use pvsignal_core::{AeRecord, EmbedField, PvError};
use tracing::{debug, info};

/// Service for generating text embeddings.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str)
        -> impl std::future::Future<Output = Result<Vec<f32>, PvError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService::embed` returns `impl Future` and so cannot be used
/// behind `dyn`. Every `EmbeddingService` gets this trait through the blanket
/// impl below, so the pipeline can hold an `Arc<dyn DynEmbeddingService>`.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, PvError>> + Send + 'a>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, PvError>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

/// Build the embedder named by `embedding.backend`.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn DynEmbeddingService>, PvError> {
    match config.backend.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedding::new(config.dimensions))),
        #[cfg(feature = "onnx")]
        "onnx" => {
            let dir = expand_home(&config.model_dir);
            Ok(Arc::new(crate::onnx::OnnxEmbeddingService::from_directory(
                std::path::Path::new(&dir),
            )?))
        }
        #[cfg(not(feature = "onnx"))]
        "onnx" => Err(PvError::Config(
            "embedding.backend = \"onnx\" requires building with the `onnx` feature".to_string(),
        )),
        other => Err(PvError::Config(format!("unknown embedding backend '{}'", other))),
    }
}

#[cfg(feature = "onnx")]
fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            format!("{}/{}", home, rest)
        }
        None => path.to_string(),
    }
}

/// Embed every record, in record order.
///
/// Fails without partial output when a record's text is blank or when a
/// vector's length differs from the service's declared dimension.
pub async fn embed_records(
    service: &dyn DynEmbeddingService,
    records: &[AeRecord],
    field: EmbedField,
) -> Result<Vec<Vec<f32>>, PvError> {
    let expected = service.dimensions();
    let mut vectors = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let text = record.embedding_text(field);
        if text.trim().is_empty() {
            return Err(PvError::Embedding(format!(
                "record {} ({}) has empty {:?} text",
                index, record.report_id, field
            )));
        }

        let vector = service.embed_boxed(&text).await?;
        if vector.len() != expected {
            return Err(PvError::Embedding(format!(
                "record {} produced a {}-dimensional vector, expected {}",
                index,
                vector.len(),
                expected
            )));
        }
        vectors.push(vector);
    }

    debug!(count = vectors.len(), dimensions = expected, "Embedded records");
    Ok(vectors)
}

// ---------------------------------------------------------------------------
// HashingEmbedding
// ---------------------------------------------------------------------------

/// Weight of a whole-word feature relative to one character trigram.
const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Feature-hashing encoder over lower-cased words and their trigrams.
///
/// Each word `w` contributes the feature `w` and every trigram of `^w$`.
/// A feature lands in bucket `hash % dimensions` with a sign taken from the
/// hash's top bit, and the result is L2-normalized. Texts sharing words or
/// spelling fragments end up close in cosine distance.
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimensions: usize,
}

impl HashingEmbedding {
    pub fn new(dimensions: usize) -> Self {
        info!(dimensions, "Using hashing embedder");
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let h = hasher.finish();
        let bucket = (h % self.dimensions as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let mut words = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .peekable();

        if words.peek().is_none() {
            self.accumulate(&mut result, lowered.trim(), WORD_WEIGHT);
        }

        for word in words {
            self.accumulate(&mut result, word, WORD_WEIGHT);

            let marked: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for window in marked.windows(3) {
                let trigram: String = window.iter().collect();
                self.accumulate(&mut result, &trigram, TRIGRAM_WEIGHT);
            }
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }
        result
    }
}

impl Default for HashingEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EmbeddingService for HashingEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PvError> {
        if text.trim().is_empty() {
            return Err(PvError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::cosine_distance;
    use pvsignal_core::Severity;

    fn record(drug: &str, event: &str) -> AeRecord {
        AeRecord {
            report_id: format!("{drug}-{event}"),
            drug_name: drug.to_string(),
            adverse_event_term: event.to_string(),
            report_date: None,
            severity: Severity::MILD,
            raw_text: String::new(),
            label: None,
        }
    }

    /// Returns vectors of the wrong length.
    struct ShortEmbedding;

    impl EmbeddingService for ShortEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, PvError> {
            Ok(vec![1.0; 3])
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    #[tokio::test]
    async fn test_hashing_dimension_and_norm() {
        let service = HashingEmbedding::new(64);
        let v = service.embed("Aspirin nausea").await.unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashing_deterministic_and_case_insensitive() {
        let service = HashingEmbedding::default();
        let v1 = service.embed("Aspirin Nausea").await.unwrap();
        let v2 = service.embed("aspirin   NAUSEA").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_hashing_similarity_tracks_overlap() {
        let service = HashingEmbedding::default();
        let base = service.embed("warfarin bleeding").await.unwrap();
        let near = service.embed("warfarin bleeding gums").await.unwrap();
        let far = service.embed("metformin lactic acidosis").await.unwrap();
        assert!(cosine_distance(&base, &near) < cosine_distance(&base, &far));
    }

    #[tokio::test]
    async fn test_hashing_punctuation_only_text() {
        let service = HashingEmbedding::new(16);
        let v = service.embed("!!!").await.unwrap();
        assert!(v.iter().any(|x| *x != 0.0));
    }

    #[tokio::test]
    async fn test_hashing_rejects_blank_text() {
        let service = HashingEmbedding::default();
        assert!(service.embed("").await.is_err());
        assert!(service.embed("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_embed_records_in_order() {
        let service = HashingEmbedding::new(32);
        let records = vec![record("Aspirin", "Nausea"), record("Ibuprofen", "Rash")];
        let vectors = embed_records(&service, &records, EmbedField::Combined)
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], service.embed("Aspirin Nausea").await.unwrap());
        assert_eq!(vectors[1], service.embed("Ibuprofen Rash").await.unwrap());
    }

    #[tokio::test]
    async fn test_embed_records_rejects_empty_field() {
        let service = HashingEmbedding::new(32);
        let records = vec![record("Aspirin", "Nausea")];
        let err = embed_records(&service, &records, EmbedField::RawText)
            .await
            .unwrap_err();
        assert!(matches!(err, PvError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_embed_records_dimension_mismatch() {
        let records = vec![record("Aspirin", "Nausea")];
        let err = embed_records(&ShortEmbedding, &records, EmbedField::Drug)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 4"));
    }

    #[test]
    fn test_embedder_from_config() {
        let config = EmbeddingConfig::default();
        let service = embedder_from_config(&config).unwrap();
        assert_eq!(service.dimensions(), 256);

        let bad = EmbeddingConfig {
            backend: "word2vec".to_string(),
            ..Default::default()
        };
        assert!(matches!(embedder_from_config(&bad), Err(PvError::Config(_))));
    }
}
