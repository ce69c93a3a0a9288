//! Offline feature-hashing embedder.
//!
//! Each lower-cased word token is hashed (SHA-256) into one of `dims`
//! buckets with a ±1 sign, and the token vectors are mean-pooled. There is
//! no model to download, so initialization is instant and results are
//! deterministic across runs and machines. Quality is lexical rather than
//! semantic; it exists for offline installs and tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{mean_pool, EmbeddingBackend, ProgressFn};
use crate::error::EmbedError;

pub(super) const DEFAULT_DIMS: usize = 256;

pub struct HashingBackend {
    dims: usize,
}

impl HashingBackend {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn token_vector(&self, token: &str) -> Vec<f32> {
        let digest = Sha256::digest(token.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };

        let mut v = vec![0f32; self.dims];
        v[bucket] = sign;
        v
    }
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn initialize(&self, _on_progress: &ProgressFn<'_>) -> Result<(), EmbedError> {
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let lowered = text.to_lowercase();
        let tokens: Vec<Vec<f32>> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| self.token_vector(t))
            .collect();
        Ok(mean_pool(&tokens, self.dims))
    }
}
