//! Embedding backend abstraction, the shared [`Embedder`] handle, and vector
//! utilities.
//!
//! Backends:
//! - **[`DisabledBackend`]** — always fails to initialize; used when embeddings are off.
//! - **[`HashingBackend`]** — offline feature-hashing embedder, no model download.
//! - **[`OllamaBackend`]** — local Ollama instance; pulls the model on init with progress.
//! - **[`OpenAIBackend`]** — OpenAI embeddings API with retry and backoff.
//! - **`LocalBackend`** — fastembed ONNX models run in-process (feature `local-embeddings-fastembed`).
//!
//! # Initialize once
//!
//! The [`Embedder`] owns one backend and memoizes its initialization. The
//! first caller of [`Embedder::init`] (or [`Embedder::embed`]) triggers the
//! model load; concurrent callers await the same in-flight initialization and
//! later calls return immediately. A failed initialization is not cached, so
//! the next caller retries.
//!
//! Every vector leaving the embedder is checked against the backend's
//! declared dimension and L2-normalized, which makes cosine similarity
//! equivalent to a dot product.
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama backends use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

mod hashing;
#[cfg(feature = "local-embeddings-fastembed")]
mod local_fastembed;
mod ollama;
mod openai;

pub use hashing::HashingBackend;
#[cfg(feature = "local-embeddings-fastembed")]
pub use local_fastembed::LocalBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAIBackend;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;
use crate::error::EmbedError;

/// Download/initialization progress callback, receives a ratio in `[0, 1]`.
pub type ProgressFn<'a> = dyn Fn(f32) + Send + Sync + 'a;

/// Trait for embedding backends.
///
/// Implementations report their model and output dimension up front,
/// perform any model download or credential check in
/// [`initialize`](EmbeddingBackend::initialize), and return one pooled
/// vector per input text from [`embed`](EmbeddingBackend::embed).
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Load or verify the model. Progress reporting is best-effort.
    async fn initialize(&self, on_progress: &ProgressFn<'_>) -> Result<(), EmbedError>;
    /// Embed a single text. Called only after a successful `initialize`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Process-scoped embedding handle shared by the indexer and the query path.
pub struct Embedder {
    backend: Box<dyn EmbeddingBackend>,
    ready: OnceCell<()>,
}

impl Embedder {
    pub fn new(backend: Box<dyn EmbeddingBackend>) -> Self {
        Self {
            backend,
            ready: OnceCell::new(),
        }
    }

    /// Build an embedder from configuration. Does not load the model.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        Ok(Self::new(create_backend(config)?))
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn dims(&self) -> usize {
        self.backend.dims()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Initialize the backend once. Concurrent callers share one
    /// initialization; only the caller that starts it receives progress.
    pub async fn init(&self, on_progress: &ProgressFn<'_>) -> Result<(), EmbedError> {
        self.ready
            .get_or_try_init(|| async {
                info!(model = self.model_name(), "initializing embedding model");
                on_progress(0.0);
                if let Err(e) = self.backend.initialize(on_progress).await {
                    warn!(model = self.model_name(), error = %e, "embedding model failed to initialize");
                    return Err(e);
                }
                on_progress(1.0);
                info!(model = self.model_name(), dims = self.dims(), "embedding model ready");
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Embed a text, initializing the backend first if needed.
    ///
    /// The result has exactly [`dims`](Self::dims) components and unit length
    /// (or is all zeros for input with no signal).
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.init(&|_| {}).await?;
        let raw = self.backend.embed(text).await?;
        if raw.len() != self.dims() {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dims(),
                actual: raw.len(),
            });
        }
        Ok(normalize_l2(raw))
    }
}

/// A backend that refuses to initialize.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledBackend;

#[async_trait]
impl EmbeddingBackend for DisabledBackend {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn initialize(&self, _on_progress: &ProgressFn<'_>) -> Result<(), EmbedError> {
        Err(EmbedError::Disabled)
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

/// Create the appropriate [`EmbeddingBackend`] based on configuration.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledBackend`] |
/// | `"hashing"` | [`HashingBackend`] |
/// | `"ollama"` | [`OllamaBackend`] |
/// | `"openai"` | [`OpenAIBackend`] |
/// | `"local"` | `LocalBackend` (fastembed, see features) |
pub fn create_backend(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingBackend>, EmbedError> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledBackend)),
        "hashing" => Ok(Box::new(HashingBackend::new(
            config.dims.unwrap_or(hashing::DEFAULT_DIMS),
        ))),
        "ollama" => Ok(Box::new(OllamaBackend::new(config)?)),
        "openai" => Ok(Box::new(OpenAIBackend::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalBackend::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(EmbedError::Unavailable(
            "local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(EmbedError::Unavailable(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// POST a JSON body, retrying rate limits, server errors and network errors
/// with exponential backoff. Returns the parsed JSON of the first 2xx reply.
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value, EmbedError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(key) = bearer {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| EmbedError::Backend(format!("{} response: {}", label, e)));
                }

                let body_text = response.text().await.unwrap_or_default();

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(EmbedError::Backend(format!(
                        "{} API error {}: {}",
                        label, status, body_text
                    )));
                    continue;
                }

                // Client error (not 429) — don't retry
                return Err(EmbedError::Backend(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(EmbedError::Backend(format!(
                    "{} connection error: {}",
                    label, e
                )));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| EmbedError::Backend(format!("{} failed after retries", label))))
}

/// Parse a JSON array of numbers into a vector.
pub(crate) fn json_to_vec(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Average token vectors into one sentence vector.
///
/// Returns a zero vector of `dims` when there are no tokens.
pub fn mean_pool(token_vectors: &[Vec<f32>], dims: usize) -> Vec<f32> {
    let mut sum = vec![0f32; dims];
    if token_vectors.is_empty() {
        return sum;
    }
    for tv in token_vectors {
        for (acc, v) in sum.iter_mut().zip(tv.iter()) {
            *acc += v;
        }
    }
    let n = token_vectors.len() as f32;
    for x in &mut sum {
        *x /= n;
    }
    sum
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use notes_rag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Returns exactly `0.0` when either
/// vector has zero magnitude, when the vectors are empty or of different
/// lengths, or when the inputs contain non-finite values.
///
/// # Formula
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON || !denom.is_finite() {
        return 0.0;
    }

    let sim = dot / denom;
    if sim.is_nan() {
        return 0.0;
    }
    sim.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct CountingBackend {
        loads: Arc<AtomicUsize>,
        dims: usize,
        output: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn initialize(&self, on_progress: &ProgressFn<'_>) -> Result<(), EmbedError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            on_progress(0.5);
            Ok(())
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(self.output.clone())
        }
    }

    fn counting(dims: usize, output: Vec<f32>) -> (Embedder, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let e = Embedder::new(Box::new(CountingBackend {
            loads: loads.clone(),
            dims,
            output,
        }));
        (e, loads)
    }

    #[tokio::test]
    async fn test_concurrent_init_loads_once() {
        let (embedder, loads) = counting(2, vec![3.0, 4.0]);
        let embedder = Arc::new(embedder);
        let a = embedder.clone();
        let b = embedder.clone();
        let (ra, rb) = tokio::join!(
            async move { a.init(&|_| {}).await },
            async move { b.init(&|_| {}).await }
        );
        ra.unwrap();
        rb.unwrap();
        embedder.embed("x").await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(embedder.is_ready());
    }

    #[tokio::test]
    async fn test_progress_reported_in_unit_range() {
        let (embedder, _) = counting(2, vec![1.0, 0.0]);
        // The callback borrows a local; it need not be 'static.
        let seen = Mutex::new(Vec::new());
        embedder
            .init(&|r| seen.lock().unwrap().push(r))
            .await
            .unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&1.0));
        assert!(seen.iter().all(|r| (0.0..=1.0).contains(r)));
    }

    #[tokio::test]
    async fn test_embed_output_is_normalized() {
        let (embedder, _) = counting(2, vec![3.0, 4.0]);
        let v = embedder.embed("x").await.unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_typed_error() {
        let (embedder, _) = counting(3, vec![1.0, 2.0]);
        match embedder.embed("x").await {
            Err(EmbedError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected dimension mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_backend_fails_typed() {
        let embedder = Embedder::new(Box::new(DisabledBackend));
        assert!(matches!(embedder.init(&|_| {}).await, Err(EmbedError::Disabled)));
        assert!(matches!(embedder.embed("x").await, Err(EmbedError::Disabled)));
        assert!(!embedder.is_ready());
    }

    #[test]
    fn test_create_backend_from_config() {
        let config = EmbeddingConfig {
            provider: "hashing".to_string(),
            dims: Some(32),
            ..Default::default()
        };
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.dims(), 32);
        assert_eq!(backend.model_name(), "hashing");
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_exactly_zero() {
        let zero = vec![0.0, 0.0, 0.0];
        let other = vec![0.3, -2.0, 7.5];
        assert_eq!(cosine_similarity(&zero, &other), 0.0);
        assert_eq!(cosine_similarity(&other, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_cosine_bounds() {
        let pairs = [
            (vec![1e-3, 5.0, -2.0], vec![4.0, 4.0, 4.0]),
            (vec![1e10, 1e10], vec![1e10, 1e10]),
            (vec![-0.5, 0.25], vec![0.1, -0.9]),
        ];
        for (a, b) in &pairs {
            let sim = cosine_similarity(a, b);
            assert!((-1.0..=1.0).contains(&sim), "out of range: {}", sim);
        }
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_mean_pool() {
        let pooled = mean_pool(&[vec![1.0, 0.0], vec![0.0, 1.0]], 2);
        assert_eq!(pooled, vec![0.5, 0.5]);
        assert_eq!(mean_pool(&[], 3), vec![0.0, 0.0, 0.0]);
    }
}
