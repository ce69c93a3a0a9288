//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait defines every storage operation the indexing
//! and query paths need: idempotent upserts keyed by chunk id, atomic
//! delete-by-source through an explicit `(owner, source)` secondary index,
//! and a full per-owner scan that feeds similarity search. It also keeps
//! the last-indexed timestamp per source so incremental runs survive
//! restarts.
//!
//! Backends:
//! - [`InMemoryStore`] — maps behind one `RwLock`; tests and ephemeral sessions.
//! - [`SqliteStore`] — `chunks` + `index_state` tables over a `sqlx` pool.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::models::EmbeddedChunk;

/// Per-owner summary used by the CLI `status` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerStats {
    pub owner_id: String,
    pub sources: usize,
    pub chunks: usize,
}

/// Abstract storage backend for embedded chunks.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace chunks by id |
/// | [`delete_by_source`](VectorStore::delete_by_source) | Remove every chunk of one source |
/// | [`replace_source`](VectorStore::replace_source) | Swap a source's whole chunk set and timestamp |
/// | [`get_all_for_owner`](VectorStore::get_all_for_owner) | Scan an owner's chunks in insertion order |
/// | [`count_for_source`](VectorStore::count_for_source) | Chunk count of one source |
/// | [`indexed_at`](VectorStore::indexed_at) | Last-indexed timestamp of a source |
/// | [`stats`](VectorStore::stats) | Per-owner source and chunk counts |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace chunks. Idempotent by chunk id; the last write for
    /// an id wins and keeps the id's original scan position.
    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Remove every chunk of `(owner_id, source_id)` in one step. A
    /// concurrent reader sees either all of them or none. Returns the number
    /// of chunks removed.
    async fn delete_by_source(&self, owner_id: &str, source_id: &str) -> Result<usize>;

    /// Replace every chunk of `(owner_id, source_id)` with `chunks` and
    /// record `indexed_at`, all in one step. Readers and concurrent writers
    /// see the old set or the new one, never a mix. Returns the number of
    /// chunks removed.
    async fn replace_source(
        &self,
        owner_id: &str,
        source_id: &str,
        chunks: &[EmbeddedChunk],
        indexed_at: i64,
    ) -> Result<usize>;

    /// All chunks owned by `owner_id`, in insertion order.
    async fn get_all_for_owner(&self, owner_id: &str) -> Result<Vec<EmbeddedChunk>>;

    async fn count_for_source(&self, owner_id: &str, source_id: &str) -> Result<usize>;

    /// Source `updated_at` (epoch ms) recorded by the last successful index.
    async fn indexed_at(&self, owner_id: &str, source_id: &str) -> Result<Option<i64>>;

    async fn set_indexed_at(&self, owner_id: &str, source_id: &str, updated_at: i64) -> Result<()>;

    async fn clear_indexed_at(&self, owner_id: &str, source_id: &str) -> Result<()>;

    /// Per-owner counts, sorted by owner id.
    async fn stats(&self) -> Result<Vec<OwnerStats>>;

    async fn owners(&self) -> Result<Vec<String>> {
        Ok(self.stats().await?.into_iter().map(|s| s.owner_id).collect())
    }
}

/// Open the store selected by `[db] backend`, creating the SQLite schema
/// when needed.
pub async fn open_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    match config.db.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StoreBackend::Sqlite => {
            let pool = crate::db::connect(config).await?;
            crate::migrate::apply_schema(&pool).await?;
            Ok(Arc::new(SqliteStore::new(pool)))
        }
    }
}
