//! Embedding service trait and implementations.
//!
//! - `OnnxEmbeddingService` loads a sentence-transformer ONNX model (e.g.
//!   all-MiniLM-L6-v2) via ort and tokenizes with the HuggingFace tokenizers
//!   crate. Batches are padded and run through the model in one call.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::TensorRef;
use sift_core::error::{Result, SiftError};
use tokenizers::Tokenizer;
use tracing::info;

/// Boxed future returned by [`DynEmbeddingService`].
pub type BoxedEmbedFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. The same
/// service (same model) must be used to build an index and to query it.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Embed several texts, returning exactly one vector per input in input
    /// order. The default implementation embeds them one at a time.
    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send + 'a {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;

    /// Name of the underlying model, recorded alongside built indexes.
    fn model_name(&self) -> &str;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// Because `EmbeddingService::embed` returns `impl Future` it is not
/// object-safe. This trait uses boxed futures instead, so the query engine
/// can hold an `Arc<dyn DynEmbeddingService>` without generics.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxedEmbedFuture<'a, Vec<f32>>;

    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxedEmbedFuture<'a, Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Blanket impl: any `EmbeddingService` automatically implements `DynEmbeddingService`.
impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxedEmbedFuture<'a, Vec<f32>> {
        Box::pin(self.embed(text))
    }

    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxedEmbedFuture<'a, Vec<Vec<f32>>> {
        Box::pin(self.embed_batch(texts))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }

    fn model_name(&self) -> &str {
        EmbeddingService::model_name(self)
    }
}

/// Scale a vector to unit length in place. Zero vectors are left alone.
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService - real ONNX Runtime inference
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed embedding service using a sentence-transformer model.
///
/// Expects a model directory containing:
/// - `model.onnx`: the sentence-transformer ONNX export
/// - `tokenizer.json`: the HuggingFace fast-tokenizer file
///
/// Mean pooling (masked by the attention mask) followed by L2 normalisation
/// produces one vector per input, matching sentence-transformers' encode.
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
    model_name: String,
}

// ort::Session is Send + Sync internally (uses Arc<SharedSessionInner>).
unsafe impl Send for OnnxEmbeddingService {}
unsafe impl Sync for OnnxEmbeddingService {}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("model_name", &self.model_name)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OnnxEmbeddingService {
    /// Load a sentence-transformer model from the given directory.
    ///
    /// The directory must contain `model.onnx` and `tokenizer.json`.
    pub fn from_directory(model_name: &str, model_dir: &Path) -> Result<Self> {
        Self::from_files(
            model_name,
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
        )
    }

    /// Load from explicit model and tokenizer file paths.
    pub fn from_files(model_name: &str, model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(SiftError::Embedding(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(SiftError::Embedding(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| SiftError::Embedding(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| SiftError::Embedding(format!("ONNX set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| SiftError::Embedding(format!("ONNX load model: {}", e)))?;

        // Sentence-transformer output is [batch, seq_len, hidden_dim].
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .map(|d| if d > 0 { d as usize } else { 384 })
            .unwrap_or(384);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| SiftError::Embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            model = %model_path.display(),
            model_name,
            dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
            model_name: model_name.to_string(),
        })
    }

    /// Tokenize `texts` into one right-padded batch, run the model once, and
    /// mean-pool each row over its real (unpadded) tokens.
    fn embed_batch_sync(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(pos) = texts.iter().position(|t| t.is_empty()) {
            return Err(SiftError::Embedding(format!(
                "Cannot embed empty text (batch position {})",
                pos
            )));
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.iter().map(String::as_str).collect::<Vec<_>>(), true)
            .map_err(|e| SiftError::Embedding(format!("Tokenization failed: {}", e)))?;

        let batch = encodings.len();
        let seq_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        if seq_len == 0 {
            return Err(SiftError::Embedding("Tokenizer produced no tokens".to_string()));
        }

        let mut ids = ndarray::Array2::<i64>::zeros((batch, seq_len));
        let mut mask = ndarray::Array2::<i64>::zeros((batch, seq_len));
        let mut types = ndarray::Array2::<i64>::zeros((batch, seq_len));
        for (row, encoding) in encodings.iter().enumerate() {
            let tokens = encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .zip(encoding.get_type_ids());
            for (col, ((&id, &m), &t)) in tokens.enumerate() {
                ids[[row, col]] = id as i64;
                mask[[row, col]] = m as i64;
                types[[row, col]] = t as i64;
            }
        }

        let ids_ref = TensorRef::from_array_view(&ids)
            .map_err(|e| SiftError::Embedding(format!("TensorRef input_ids: {}", e)))?;
        let mask_ref = TensorRef::from_array_view(&mask)
            .map_err(|e| SiftError::Embedding(format!("TensorRef attention_mask: {}", e)))?;
        let type_ref = TensorRef::from_array_view(&types)
            .map_err(|e| SiftError::Embedding(format!("TensorRef token_type_ids: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| SiftError::Embedding(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| SiftError::Embedding(format!("ONNX inference failed: {}", e)))?;

        // Token embeddings, flat: [batch, seq_len, hidden_dim].
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SiftError::Embedding(format!("Extract embeddings: {}", e)))?;

        let hidden_dim = match shape.iter().copied().collect::<Vec<i64>>().as_slice() {
            [b, s, h] if *b as usize == batch && *s as usize == seq_len => *h as usize,
            other => {
                return Err(SiftError::Embedding(format!(
                    "Unexpected output shape {:?} for batch {}x{}",
                    other, batch, seq_len
                )))
            }
        };

        let vectors = (0..batch)
            .map(|row| {
                let mut pooled = vec![0.0f32; hidden_dim];
                let mut count = 0.0f32;
                for col in 0..seq_len {
                    if mask[[row, col]] == 0 {
                        continue;
                    }
                    let offset = (row * seq_len + col) * hidden_dim;
                    for (slot, value) in pooled.iter_mut().zip(&data[offset..offset + hidden_dim]) {
                        *slot += value;
                    }
                    count += 1.0;
                }
                if count > 0.0 {
                    pooled.iter_mut().for_each(|v| *v /= count);
                }
                l2_normalize(&mut pooled);
                pooled
            })
            .collect();

        Ok(vectors)
    }

    fn worker(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            tokenizer: Arc::clone(&self.tokenizer),
            dimensions: self.dimensions,
            model_name: self.model_name.clone(),
        }
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| SiftError::Embedding("Model returned no embedding".to_string()))
    }

    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send + 'a {
        // ONNX Runtime inference is CPU-bound; run on a blocking thread.
        let svc = self.worker();
        let owned = texts.to_vec();
        async move {
            tokio::task::spawn_blocking(move || svc.embed_batch_sync(&owned))
                .await
                .map_err(|e| SiftError::Embedding(format!("Embedding task panicked: {}", e)))?
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Model name reported by [`MockEmbedding`].
pub const MOCK_MODEL_NAME: &str = "mock-embedding";

/// Mock embedding service that returns deterministic unit vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs and distinct inputs land far apart.
/// Specific texts can be pinned to chosen vectors with [`MockEmbedding::with_fixed`].
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
    fixed: HashMap<String, Vec<f32>>,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(384)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            fixed: HashMap::new(),
        }
    }

    /// Return `vector` whenever exactly `text` is embedded.
    pub fn with_fixed(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.fixed.insert(text.to_string(), vector);
        self
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        l2_normalize(&mut result);
        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(SiftError::Embedding("Cannot embed empty text".to_string()));
        }
        if let Some(vector) = self.fixed.get(text) {
            return Ok(vector.clone());
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        MOCK_MODEL_NAME
    }
}
