//! In-process embeddings via fastembed (ONNX Runtime bundled).
//!
//! Models are downloaded from Hugging Face on first initialization and
//! cached; afterwards embedding runs fully offline. fastembed does not expose
//! byte-level download progress, so only the start and end of the load are
//! reported.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::{EmbeddingBackend, ProgressFn};
use crate::config::EmbeddingConfig;
use crate::error::EmbedError;

pub struct LocalBackend {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    loaded: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let (model_name, dims) = resolve_local_model(config);
        let model = to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            dims,
            loaded: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for LocalBackend {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn initialize(&self, _on_progress: &ProgressFn<'_>) -> Result<(), EmbedError> {
        let model = self.model.clone();
        let slot = self.loaded.clone();
        tokio::task::spawn_blocking(move || {
            let embedding = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model).with_show_download_progress(false),
            )
            .map_err(|e| {
                EmbedError::Unavailable(format!("Failed to initialize local embedding model: {}", e))
            })?;
            let mut guard = slot
                .lock()
                .map_err(|_| EmbedError::Backend("local model lock poisoned".into()))?;
            *guard = Some(embedding);
            Ok(())
        })
        .await
        .map_err(|e| EmbedError::Backend(format!("model load task failed: {}", e)))?
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let slot = self.loaded.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| EmbedError::Backend("local model lock poisoned".into()))?;
            let model = guard
                .as_mut()
                .ok_or_else(|| EmbedError::Unavailable("local model not loaded".into()))?;
            let mut out = model
                .embed(vec![text], None)
                .map_err(|e| EmbedError::Backend(format!("Local embedding failed: {}", e)))?;
            out.pop()
                .ok_or_else(|| EmbedError::Backend("Local embedding returned no vector".into()))
        })
        .await
        .map_err(|e| EmbedError::Backend(format!("embedding task failed: {}", e)))?
    }
}

fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "bge-base-en-v1.5" | "nomic-embed-text-v1.5" | "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel, EmbedError> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(EmbedError::Unavailable(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base, \
             multilingual-e5-large",
            other
        ))),
    }
}
