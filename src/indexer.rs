//! Indexing orchestrator.
//!
//! Turns sources into stored vectors and tracks the run state
//! `idle → downloading_model → indexing → ready` (or `error`). Subscribers
//! receive `{status, progress}` snapshots through a `tokio::sync::watch`
//! channel; CLI users additionally get stderr output through an
//! [`IndexProgressReporter`].
//!
//! Per source: chunk, embed every chunk, then hand the complete set to
//! [`VectorStore::replace_source`], which drops the old chunks, stores the
//! new ones and records `updated_at` as the last-indexed timestamp in one
//! step. Two overlapping re-indexes of the same source therefore each leave
//! a complete set, and an embedding failure leaves the previous set intact.
//! Full runs abort on the first failing source; incremental runs log and
//! skip it. Only one run (full or incremental) is in flight at a time; a
//! second caller gets [`RunOutcome::AlreadyRunning`] immediately.

use anyhow::{bail, Result};
use futures::{stream, StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chunk::{chunk_source, ChunkOptions};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::EmbedError;
use crate::models::{EmbeddedChunk, Source, SourceContent};
use crate::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress};
use crate::store::VectorStore;

#[derive(Debug, Clone, PartialEq)]
pub enum IndexStatus {
    Idle,
    DownloadingModel,
    Indexing,
    Ready,
    Error(String),
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Idle => "idle",
            IndexStatus::DownloadingModel => "downloading_model",
            IndexStatus::Indexing => "indexing",
            IndexStatus::Ready => "ready",
            IndexStatus::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexProgress {
    /// Sources processed so far in the current run.
    pub indexed: usize,
    /// Sources in the current run.
    pub total: usize,
    /// Model download ratio while `DownloadingModel`.
    pub download: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    pub status: IndexStatus,
    pub progress: IndexProgress,
}

/// Result of a full or incremental run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { indexed: usize, failed: usize },
    /// Another run held the guard; nothing was done.
    AlreadyRunning,
}

/// Releases the run flag on drop, including on early return and panic.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Indexer {
    embedder: Arc<Embedder>,
    store: Arc<dyn VectorStore>,
    chunk_opts: ChunkOptions,
    concurrency: usize,
    running: AtomicBool,
    state: watch::Sender<IndexSnapshot>,
    reporter: Box<dyn IndexProgressReporter>,
}

impl Indexer {
    pub fn new(embedder: Arc<Embedder>, store: Arc<dyn VectorStore>) -> Self {
        let (state, _) = watch::channel(IndexSnapshot {
            status: IndexStatus::Idle,
            progress: IndexProgress::default(),
        });
        Self {
            embedder,
            store,
            chunk_opts: ChunkOptions::default(),
            concurrency: 1,
            running: AtomicBool::new(false),
            state,
            reporter: Box::new(NoProgress),
        }
    }

    pub fn from_config(config: &Config, embedder: Arc<Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self::new(embedder, store)
            .with_chunk_options(config.chunking.to_options())
            .with_concurrency(config.embedding.concurrency)
    }

    pub fn with_chunk_options(mut self, opts: ChunkOptions) -> Self {
        self.chunk_opts = opts;
        self
    }

    /// Maximum concurrent embedding calls within one source. `1` embeds
    /// chunks strictly one after another.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn IndexProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<IndexSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Re-index every source, in order. A failing source aborts the run and
    /// leaves the status at `Error`; sources indexed before it stay indexed.
    pub async fn index_all(&self, sources: &[Source]) -> Result<RunOutcome> {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            debug!("index run already in flight; skipping full run");
            return Ok(RunOutcome::AlreadyRunning);
        };

        let total = sources.len();
        info!(total, "starting full index run");
        self.init_embedder(total).await?;
        self.begin_indexing(total);

        for (i, source) in sources.iter().enumerate() {
            if let Err(e) = self.index_source(source).await {
                let message = format!("{} ({}): {:#}", source.title, source.id, e);
                self.fail(&message);
                return Err(e.context(format!("indexing aborted at source {}", source.id)));
            }
            self.advance(i + 1, total);
        }

        self.finish(total);
        Ok(RunOutcome::Completed {
            indexed: total,
            failed: 0,
        })
    }

    /// Index a single source now. Returns the number of chunks stored.
    ///
    /// With no run in flight this is a one-source run: it holds the run
    /// guard and publishes `indexing` then `ready` or `error`. During another
    /// run it indexes without touching that run's status.
    pub async fn index_one(&self, source: &Source) -> Result<usize> {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            self.embedder.init(&|_| {}).await?;
            return self.index_source(source).await;
        };

        self.init_embedder(1).await?;
        self.begin_indexing(1);
        match self.index_source(source).await {
            Ok(count) => {
                self.advance(1, 1);
                self.finish(1);
                Ok(count)
            }
            Err(e) => {
                self.fail(&format!("{} ({}): {:#}", source.title, source.id, e));
                Err(e)
            }
        }
    }

    /// Incremental run: re-index sources whose `updated_at` is newer than
    /// their last-indexed timestamp, or that were never indexed. Failing
    /// sources are logged and skipped.
    pub async fn index_stale(&self, sources: &[Source]) -> Result<RunOutcome> {
        let Some(_guard) = RunGuard::try_acquire(&self.running) else {
            debug!("index run already in flight; skipping incremental run");
            return Ok(RunOutcome::AlreadyRunning);
        };

        let mut stale = Vec::new();
        for source in sources {
            if self.is_stale(source).await? {
                stale.push(source);
            }
        }
        if stale.is_empty() {
            debug!(checked = sources.len(), "no stale sources");
            return Ok(RunOutcome::Completed {
                indexed: 0,
                failed: 0,
            });
        }

        let total = stale.len();
        info!(stale = total, "starting incremental index run");
        self.init_embedder(total).await?;
        self.begin_indexing(total);

        let mut indexed = 0;
        let mut failed = 0;
        for (i, source) in stale.iter().enumerate() {
            match self.index_source(source).await {
                Ok(_) => indexed += 1,
                Err(e) => {
                    warn!(source = %source.id, error = %format!("{:#}", e), "skipping source");
                    failed += 1;
                }
            }
            self.advance(i + 1, total);
        }

        self.finish(indexed);
        Ok(RunOutcome::Completed { indexed, failed })
    }

    /// Run [`index_stale`](Self::index_stale) on a background task.
    pub fn spawn_incremental(self: &Arc<Self>, sources: Vec<Source>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.index_stale(&sources).await {
                warn!(error = %format!("{:#}", e), "incremental index run failed");
            }
        })
    }

    /// Remove a source's chunks and its last-indexed timestamp.
    pub async fn remove_source(&self, owner_id: &str, source_id: &str) -> Result<usize> {
        let removed = self.store.delete_by_source(owner_id, source_id).await?;
        self.store.clear_indexed_at(owner_id, source_id).await?;
        info!(owner = owner_id, source = source_id, removed, "removed source from index");
        Ok(removed)
    }

    pub async fn is_stale(&self, source: &Source) -> Result<bool> {
        Ok(match self.store.indexed_at(&source.owner_id, &source.id).await? {
            Some(ts) => source.updated_at_ms() > ts,
            None => true,
        })
    }

    async fn index_source(&self, source: &Source) -> Result<usize> {
        if let SourceContent::Document {
            extraction_error: Some(err),
            ..
        } = &source.content
        {
            bail!("text extraction failed for {}: {}", source.title, err);
        }

        let chunks = chunk_source(source, &self.chunk_opts);
        let count = chunks.len();

        let embedded = self.embed_chunks(chunks).await?;
        let removed = self
            .store
            .replace_source(
                &source.owner_id,
                &source.id,
                &embedded,
                source.updated_at_ms(),
            )
            .await?;

        debug!(source = %source.id, removed, chunks = count, "indexed source");
        Ok(count)
    }

    async fn embed_chunks(
        &self,
        chunks: Vec<crate::models::Chunk>,
    ) -> Result<Vec<EmbeddedChunk>, EmbedError> {
        if self.concurrency <= 1 {
            let mut out = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let vector = self.embedder.embed(&chunk.content).await?;
                out.push(EmbeddedChunk { chunk, vector });
            }
            return Ok(out);
        }

        stream::iter(chunks.into_iter().map(|chunk| async move {
            let vector = self.embedder.embed(&chunk.content).await?;
            Ok::<_, EmbedError>(EmbeddedChunk { chunk, vector })
        }))
        .buffer_unordered(self.concurrency)
        .try_collect()
        .await
    }

    async fn init_embedder(&self, total: usize) -> Result<()> {
        if !self.embedder.is_ready() {
            self.state.send_replace(IndexSnapshot {
                status: IndexStatus::DownloadingModel,
                progress: IndexProgress {
                    indexed: 0,
                    total,
                    download: Some(0.0),
                },
            });
        }

        let on_progress = |ratio: f32| {
            self.state.send_modify(|s| s.progress.download = Some(ratio));
            self.reporter
                .report(&IndexProgressEvent::DownloadingModel { ratio });
        };
        if let Err(e) = self.embedder.init(&on_progress).await {
            self.fail(&e.to_string());
            return Err(e.into());
        }
        Ok(())
    }

    fn begin_indexing(&self, total: usize) {
        self.state.send_replace(IndexSnapshot {
            status: IndexStatus::Indexing,
            progress: IndexProgress {
                indexed: 0,
                total,
                download: None,
            },
        });
        self.reporter
            .report(&IndexProgressEvent::Indexing { n: 0, total: total as u64 });
    }

    fn advance(&self, n: usize, total: usize) {
        self.state.send_modify(|s| s.progress.indexed = n);
        self.reporter.report(&IndexProgressEvent::Indexing {
            n: n as u64,
            total: total as u64,
        });
    }

    fn finish(&self, indexed: usize) {
        self.state.send_modify(|s| s.status = IndexStatus::Ready);
        info!(indexed, "index run finished");
        self.reporter.report(&IndexProgressEvent::Ready {
            indexed: indexed as u64,
        });
    }

    fn fail(&self, message: &str) {
        warn!(error = message, "index run failed");
        self.state
            .send_modify(|s| s.status = IndexStatus::Error(message.to_string()));
        self.reporter.report(&IndexProgressEvent::Failed {
            message: message.to_string(),
        });
    }
}
