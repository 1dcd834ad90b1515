//! Sentence-transformer embeddings through ONNX Runtime.
//!
//! Expects a model directory holding `model.onnx` (e.g. an all-MiniLM-L6-v2
//! export taking `input_ids`, `attention_mask` and `token_type_ids`) and the
//! matching `tokenizer.json`. Token embeddings are mean-pooled under the
//! attention mask and L2-normalized.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ndarray::Array2;
use ort::session::Session;
use ort::value::TensorRef;
use pvsignal_core::PvError;
use tokenizers::Tokenizer;
use tracing::info;

use crate::embedding::EmbeddingService;

/// Hidden size of all-MiniLM-L6-v2, used when the model does not declare one.
const FALLBACK_DIMENSIONS: usize = 384;

fn onnx_err(context: &str, e: impl std::fmt::Display) -> PvError {
    PvError::Embedding(format!("{}: {}", context, e))
}

#[derive(Clone)]
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OnnxEmbeddingService {
    pub fn from_directory(model_dir: &Path) -> Result<Self, PvError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        for path in [&model_path, &tokenizer_path] {
            if !path.exists() {
                return Err(PvError::Config(format!(
                    "embedding model file not found at {}",
                    path.display()
                )));
            }
        }

        let session = Session::builder()
            .map_err(|e| onnx_err("ONNX session builder", e))?
            .with_intra_threads(1)
            .map_err(|e| onnx_err("ONNX set threads", e))?
            .commit_from_file(&model_path)
            .map_err(|e| onnx_err("ONNX load model", e))?;

        // Output is [batch, seq_len, hidden]; a dynamic axis reports -1.
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .filter(|d| *d > 0)
            .map(|d| d as usize)
            .unwrap_or(FALLBACK_DIMENSIONS);

        let tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| onnx_err("load tokenizer", e))?;

        info!(model = %model_path.display(), dimensions, "Loaded ONNX embedding model");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
        })
    }

    fn embed_blocking(&self, text: &str) -> Result<Vec<f32>, PvError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| onnx_err("tokenization", e))?;

        let seq_len = encoding.get_ids().len();
        let to_array = |values: &[u32]| {
            Array2::from_shape_vec((1, seq_len), values.iter().map(|&v| v as i64).collect())
                .map_err(|e| onnx_err("input tensor", e))
        };
        let ids = to_array(encoding.get_ids())?;
        let mask = to_array(encoding.get_attention_mask())?;
        let types = to_array(encoding.get_type_ids())?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| onnx_err("session lock poisoned", e))?;
        let outputs = session
            .run(ort::inputs![
                TensorRef::from_array_view(&ids).map_err(|e| onnx_err("input_ids", e))?,
                TensorRef::from_array_view(&mask).map_err(|e| onnx_err("attention_mask", e))?,
                TensorRef::from_array_view(&types).map_err(|e| onnx_err("token_type_ids", e))?
            ])
            .map_err(|e| onnx_err("ONNX inference", e))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| onnx_err("extract embeddings", e))?;
        let Some(&hidden) = shape.iter().last().filter(|_| shape.len() >= 2) else {
            return Err(PvError::Embedding(format!(
                "unexpected output shape {:?}",
                shape
            )));
        };
        let hidden = hidden as usize;

        let mut pooled = vec![0.0f32; hidden];
        let mut count = 0.0f32;
        for (token, &m) in encoding.get_attention_mask().iter().enumerate() {
            if m == 0 {
                continue;
            }
            let row = &data[token * hidden..(token + 1) * hidden];
            for (acc, v) in pooled.iter_mut().zip(row) {
                *acc += v;
            }
            count += 1.0;
        }
        if count > 0.0 {
            pooled.iter_mut().for_each(|v| *v /= count);
        }

        let norm: f32 = pooled.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            pooled.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(pooled)
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PvError> {
        if text.trim().is_empty() {
            return Err(PvError::Embedding("Cannot embed empty text".to_string()));
        }
        let service = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || service.embed_blocking(&text))
            .await
            .map_err(|e| onnx_err("embedding task panicked", e))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
