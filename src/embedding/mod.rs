//! Embedding clients
//!
//! A trait-based embedding backend so production code can use an
//! OpenAI-compatible API or fastembed while tests use the deterministic
//! hash embedder. All backends embed in batches and produce fixed-dimension
//! vectors.

mod http;

pub use http::HttpEmbedder;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from embedding operations
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("embedding returned no results")]
    EmptyResult,

    #[error("embedding rate limited, retry after {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },

    #[error("embedding backend error: {0}")]
    Backend(String),
}

/// Trait for embedding text into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// The dimensionality of vectors this embedder produces.
    fn dimensions(&self) -> usize;
}

/// Deterministic token-hash embedder.
///
/// Each token hashes into a bucket of the output vector; the result is
/// L2-normalized. Texts sharing tokens get similar vectors, which is enough
/// signal for tests and for local mode without a model download.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for HashEmbedder {
    /// 64 dimensions — small enough for brute-force search in tests.
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; self.dimensions];
                for token in text.split_whitespace() {
                    let token = token
                        .trim_matches(|c: char| c.is_ascii_punctuation())
                        .to_lowercase();
                    if token.is_empty() {
                        continue;
                    }
                    let h = fnv1a(token.as_bytes());
                    let bucket = (h % self.dimensions as u64) as usize;
                    // Sign from a second hash bit keeps buckets from saturating
                    let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
                    v[bucket] += sign;
                }
                let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in v.iter_mut() {
                        *x /= norm;
                    }
                }
                v
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// FNV-1a: stable across runs, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

// ---------------------------------------------------------------------------
// FastEmbedder — local ONNX embedder behind the `embeddings` feature
// ---------------------------------------------------------------------------

#[cfg(feature = "embeddings")]
mod fastembed_impl {
    use super::{Embedder, EmbeddingError};
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::{Arc, Mutex};

    /// Local embedder backed by fastembed (ONNX Runtime).
    ///
    /// `TextEmbedding::embed` requires `&mut self` and blocks, so the model
    /// sits behind an `Arc<Mutex>` and inference runs on the blocking pool.
    pub struct FastEmbedder {
        model: Arc<Mutex<TextEmbedding>>,
        dimensions: usize,
    }

    impl FastEmbedder {
        pub fn new(model: EmbeddingModel, dimensions: usize) -> Result<Self, EmbeddingError> {
            let options = InitOptions::new(model).with_show_download_progress(false);
            let embedding = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::Backend(e.to_string()))?;
            Ok(Self {
                model: Arc::new(Mutex::new(embedding)),
                dimensions,
            })
        }

        /// Default model: nomic-embed-text-v1.5 (768 dimensions).
        pub fn default_model() -> Result<Self, EmbeddingError> {
            Self::new(EmbeddingModel::NomicEmbedTextV15, 768)
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let model = self.model.clone();
            let texts = texts.to_vec();
            let embeddings = tokio::task::spawn_blocking(move || {
                model.lock().unwrap().embed(texts, None)
            })
            .await
            .map_err(|e| EmbeddingError::Backend(e.to_string()))?
            .map_err(|e| EmbeddingError::Backend(e.to_string()))?;
            if embeddings.is_empty() {
                return Err(EmbeddingError::EmptyResult);
            }
            Ok(embeddings)
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }
    }
}

#[cfg(feature = "embeddings")]
pub use fastembed_impl::FastEmbedder;
