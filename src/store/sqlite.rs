//! SQLite-backed [`VectorStore`] implementation.
//!
//! Wraps a [`SqlitePool`] and maps each trait method onto the schema in
//! [`crate::migrate`]. Upserts use `ON CONFLICT(chunk_id) DO UPDATE`, which
//! keeps the row's rowid, so scan order stays insertion order across
//! rewrites.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::{OwnerStats, VectorStore};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{Chunk, EmbeddedChunk, SourceKind};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const SET_INDEXED_AT: &str = r#"
    INSERT INTO index_state (owner_id, source_id, indexed_at)
    VALUES (?, ?, ?)
    ON CONFLICT(owner_id, source_id) DO UPDATE SET indexed_at = excluded.indexed_at
"#;

async fn upsert_row(tx: &mut Transaction<'_, Sqlite>, ec: &EmbeddedChunk) -> Result<()> {
    let c = &ec.chunk;
    sqlx::query(
        r#"
        INSERT INTO chunks (chunk_id, owner_id, source_id, source_type, source_title,
                            chunk_index, content, page_number, updated_at,
                            content_hash, dims, embedding)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            owner_id = excluded.owner_id,
            source_id = excluded.source_id,
            source_type = excluded.source_type,
            source_title = excluded.source_title,
            chunk_index = excluded.chunk_index,
            content = excluded.content,
            page_number = excluded.page_number,
            updated_at = excluded.updated_at,
            content_hash = excluded.content_hash,
            dims = excluded.dims,
            embedding = excluded.embedding
        "#,
    )
    .bind(&c.id)
    .bind(&c.owner_id)
    .bind(&c.source_id)
    .bind(c.source_type.as_str())
    .bind(&c.source_title)
    .bind(c.chunk_index)
    .bind(&c.content)
    .bind(c.page_number.map(i64::from))
    .bind(c.updated_at)
    .bind(&c.hash)
    .bind(ec.vector.len() as i64)
    .bind(vec_to_blob(&ec.vector))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn row_to_embedded(row: &SqliteRow) -> Result<EmbeddedChunk> {
    let source_type: String = row.get("source_type");
    let source_type = SourceKind::parse(&source_type)
        .ok_or_else(|| anyhow!("unknown source_type in store: {}", source_type))?;
    let page_number: Option<i64> = row.get("page_number");
    let blob: Vec<u8> = row.get("embedding");

    Ok(EmbeddedChunk {
        chunk: Chunk {
            id: row.get("chunk_id"),
            owner_id: row.get("owner_id"),
            source_id: row.get("source_id"),
            source_type,
            source_title: row.get("source_title"),
            chunk_index: row.get("chunk_index"),
            content: row.get("content"),
            page_number: page_number.and_then(|p| u32::try_from(p).ok()),
            updated_at: row.get("updated_at"),
            hash: row.get("content_hash"),
        },
        vector: blob_to_vec(&blob),
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for ec in chunks {
            upsert_row(&mut tx, ec).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_source(
        &self,
        owner_id: &str,
        source_id: &str,
        chunks: &[EmbeddedChunk],
        indexed_at: i64,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM chunks WHERE owner_id = ? AND source_id = ?")
            .bind(owner_id)
            .bind(source_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        for ec in chunks {
            upsert_row(&mut tx, ec).await?;
        }
        sqlx::query(SET_INDEXED_AT)
            .bind(owner_id)
            .bind(source_id)
            .bind(indexed_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn delete_by_source(&self, owner_id: &str, source_id: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM chunks WHERE owner_id = ? AND source_id = ?")
            .bind(owner_id)
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn get_all_for_owner(&self, owner_id: &str) -> Result<Vec<EmbeddedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, owner_id, source_id, source_type, source_title, chunk_index,
                   content, page_number, updated_at, content_hash, embedding
            FROM chunks
            WHERE owner_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_embedded).collect()
    }

    async fn count_for_source(&self, owner_id: &str, source_id: &str) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE owner_id = ? AND source_id = ?")
                .bind(owner_id)
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    async fn indexed_at(&self, owner_id: &str, source_id: &str) -> Result<Option<i64>> {
        let ts: Option<i64> = sqlx::query_scalar(
            "SELECT indexed_at FROM index_state WHERE owner_id = ? AND source_id = ?",
        )
        .bind(owner_id)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ts)
    }

    async fn set_indexed_at(&self, owner_id: &str, source_id: &str, updated_at: i64) -> Result<()> {
        sqlx::query(SET_INDEXED_AT)
            .bind(owner_id)
            .bind(source_id)
            .bind(updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_indexed_at(&self, owner_id: &str, source_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_state WHERE owner_id = ? AND source_id = ?")
            .bind(owner_id)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<OwnerStats>> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id, COUNT(DISTINCT source_id) AS sources, COUNT(*) AS chunks
            FROM chunks
            GROUP BY owner_id
            ORDER BY owner_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| OwnerStats {
                owner_id: row.get("owner_id"),
                sources: row.get::<i64, _>("sources") as usize,
                chunks: row.get::<i64, _>("chunks") as usize,
            })
            .collect())
    }
}
