//! TOML configuration parsing and validation.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration (local embeddings, SQLite store, no hosted model, web
//! fallback on). Relevance thresholds are tunable parameters; the defaults
//! are hand-tuned starting points, not fixed behavior.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::ChunkOptions;
use crate::retrieve::RetrieveOptions;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub notes: NotesConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub local_llm: LocalLlmConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/notes-rag.sqlite")
}

/// Filesystem source feed used by the CLI.
#[derive(Debug, Deserialize, Clone)]
pub struct NotesConfig {
    #[serde(default = "default_notes_root")]
    pub root: PathBuf,
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            root: default_notes_root(),
            owner: default_owner(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_notes_root() -> PathBuf {
    PathBuf::from("./notes")
}
fn default_owner() -> String {
    "me".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.pages.json".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_options(&self) -> ChunkOptions {
        ChunkOptions {
            target_chars: self.target_chars,
            overlap_chars: self.overlap_chars,
        }
    }
}

fn default_target_chars() -> usize {
    1200
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_min_top_score")]
    pub min_top_score: f32,
    #[serde(default = "default_max_notes")]
    pub max_notes: usize,
    #[serde(default = "default_max_chunks_per_note")]
    pub max_chunks_per_note: usize,
    #[serde(default = "default_fallback_chunks")]
    pub fallback_chunks: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            min_top_score: default_min_top_score(),
            max_notes: default_max_notes(),
            max_chunks_per_note: default_max_chunks_per_note(),
            fallback_chunks: default_fallback_chunks(),
            max_context_chars: default_max_context_chars(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

impl RetrievalConfig {
    pub fn to_options(&self) -> RetrieveOptions {
        RetrieveOptions {
            top_k: self.top_k,
            min_score: self.min_score,
            min_top_score: self.min_top_score,
            max_notes: self.max_notes,
            max_chunks_per_note: self.max_chunks_per_note,
            fallback_chunks: self.fallback_chunks,
            max_context_chars: self.max_context_chars,
            snippet_chars: self.snippet_chars,
        }
    }
}

fn default_top_k() -> usize {
    12
}
fn default_min_score() -> f32 {
    0.18
}
fn default_min_top_score() -> f32 {
    0.12
}
fn default_max_notes() -> usize {
    4
}
fn default_max_chunks_per_note() -> usize {
    2
}
fn default_fallback_chunks() -> usize {
    4
}
fn default_max_context_chars() -> usize {
    8000
}
fn default_snippet_chars() -> usize {
    180
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider, or an override for `openai`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Concurrent embedding calls per source; 1 means strictly sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    1
}

/// Hosted chat-completion model (OpenAI-compatible endpoint).
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    /// First backoff delay after a 429; doubles per attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            url: default_llm_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_llm_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_llm_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    300
}
fn default_llm_retries() -> u32 {
    4
}
fn default_backoff_ms() -> u64 {
    1000
}

/// On-device model served by a local Ollama runtime.
#[derive(Debug, Deserialize, Clone)]
pub struct LocalLlmConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_local_url")]
    pub url: String,
    #[serde(default = "default_local_model")]
    pub model: String,
    /// Try the on-device model before the hosted one.
    #[serde(default)]
    pub prefer: bool,
    /// Refuse CPU-only runtimes; the capability check requires GPU offload.
    #[serde(default = "default_require_acceleration")]
    pub require_acceleration: bool,
}

impl Default for LocalLlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_local_url(),
            model: default_local_model(),
            prefer: false,
            require_acceleration: default_require_acceleration(),
        }
    }
}

fn default_local_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_local_model() -> String {
    "llama3.2".to_string()
}
fn default_require_acceleration() -> bool {
    true
}

/// Public web-summary endpoint used when notes have nothing relevant.
#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_enabled")]
    pub enabled: bool,
    #[serde(default = "default_web_url")]
    pub url: String,
    #[serde(default = "default_web_timeout")]
    pub timeout_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_enabled(),
            url: default_web_url(),
            timeout_secs: default_web_timeout(),
        }
    }
}

fn default_web_enabled() -> bool {
    true
}
fn default_web_url() -> String {
    "https://en.wikipedia.org".to_string()
}
fn default_web_timeout() -> u64 {
    10
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.target_chars == 0 {
        bail!("chunking.target_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.target_chars {
        bail!("chunking.overlap_chars must be smaller than chunking.target_chars");
    }

    // Validate retrieval
    let r = &config.retrieval;
    if r.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if r.max_notes < 1 || r.max_chunks_per_note < 1 {
        bail!("retrieval.max_notes and retrieval.max_chunks_per_note must be >= 1");
    }
    if r.max_context_chars == 0 {
        bail!("retrieval.max_context_chars must be > 0");
    }
    for (name, v) in [("min_score", r.min_score), ("min_top_score", r.min_top_score)] {
        if !(-1.0..=1.0).contains(&v) {
            bail!("retrieval.{} must be in [-1.0, 1.0]", name);
        }
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" | "ollama" | "openai" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, ollama, openai, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.concurrency == 0 {
        bail!("embedding.concurrency must be >= 1");
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
        && config.embedding.model.is_none()
    {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    // Validate hosted model
    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.chunking.target_chars, 1200);
        assert_eq!(config.retrieval.top_k, 12);
        assert!((config.retrieval.min_top_score - 0.12).abs() < 1e-6);
        assert_eq!(config.db.backend, StoreBackend::Sqlite);
        assert!(!config.llm.is_enabled());
        assert!(config.web.enabled);
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
[db]
backend = "memory"

[retrieval]
min_score = 0.3
max_notes = 2

[embedding]
provider = "hashing"
dims = 64
"#,
        )
        .unwrap();
        validate(&config).unwrap();
        assert_eq!(config.db.backend, StoreBackend::Memory);
        let opts = config.retrieval.to_options();
        assert_eq!(opts.max_notes, 2);
        assert_eq!(opts.top_k, 12);
        assert_eq!(config.embedding.dims, Some(64));
    }

    #[test]
    fn test_rejects_overlap_larger_than_target() {
        let config: Config =
            toml::from_str("[chunking]\ntarget_chars = 100\noverlap_chars = 100\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"\n").unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("Unknown embedding provider"));
    }

    #[test]
    fn test_remote_embedding_requires_model() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"ollama\"\n").unwrap();
        assert!(validate(&config).is_err());
    }
}
