//! Typed errors for the embedding and answer-provider boundaries.
//!
//! Orchestration code (indexing, storage, CLI) works in `anyhow::Result`;
//! these enums exist where callers need to branch on *why* something
//! failed — an embedder that cannot initialize versus one that returned a
//! malformed vector, or a hosted model that is merely unconfigured versus one
//! that is rate limiting us.

use thiserror::Error;

/// Failure raised by the [`Embedder`](crate::embedding::Embedder) or one of
/// its backends.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The provider is switched off in configuration.
    #[error("embedding provider is disabled")]
    Disabled,

    /// The backend could not be initialized (no network, missing model,
    /// unsupported runtime, missing credential).
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    /// The backend was initialized but a single embedding call failed.
    #[error("embedding failed: {0}")]
    Backend(String),

    /// The backend returned a vector whose length does not match its
    /// declared output dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Failure raised by a hosted, on-device, or web-knowledge provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Missing credential, endpoint, or capability. Detected before any
    /// request is made.
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// HTTP 429 persisted through every retry attempt.
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Non-2xx response other than rate limiting.
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, TLS, or body-read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 2xx response whose body did not have the expected shape.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}
