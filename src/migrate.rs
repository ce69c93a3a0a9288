//! SQLite schema for the vector store.
//!
//! Two tables: `chunks` holds one row per embedded chunk (vector as a
//! little-endian f32 BLOB) with an explicit `(owner_id, source_id)` index
//! for source-scoped deletes; `index_state` records the source timestamp
//! seen by the last successful index of each source. All statements are
//! idempotent.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect using `[db] path` and create the schema. Used by `notes-rag init`.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            source_title TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            page_number INTEGER,
            updated_at INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_state (
            owner_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (owner_id, source_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_owner ON chunks(owner_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_owner_source ON chunks(owner_id, source_id)")
        .execute(pool)
        .await?;

    Ok(())
}
