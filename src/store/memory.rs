//! In-memory [`VectorStore`] implementation.
//!
//! All state sits behind a single `std::sync::RwLock`, so every operation,
//! including a multi-chunk delete, is atomic with respect to readers. The
//! `(owner, source)` secondary index makes source-scoped deletes cheap.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{OwnerStats, VectorStore};
use crate::models::EmbeddedChunk;

type SourceKey = (String, String);

#[derive(Default)]
struct Inner {
    chunks: HashMap<String, EmbeddedChunk>,
    /// Owner id -> chunk ids in insertion order.
    by_owner: HashMap<String, Vec<String>>,
    /// (owner id, source id) -> chunk ids.
    by_source: HashMap<SourceKey, Vec<String>>,
    indexed_at: HashMap<SourceKey, i64>,
}

impl Inner {
    fn put(&mut self, ec: &EmbeddedChunk) {
        let id = ec.chunk.id.clone();
        let owner = ec.chunk.owner_id.clone();
        let source = ec.chunk.source_id.clone();

        let moved = match self.chunks.get(&id) {
            Some(prev) => prev.chunk.owner_id != owner || prev.chunk.source_id != source,
            None => true,
        };
        if moved {
            if let Some(prev) = self.chunks.get(&id) {
                let (o, s) = (prev.chunk.owner_id.clone(), prev.chunk.source_id.clone());
                self.unlink(&id, &o, &s);
            }
            self.by_owner.entry(owner.clone()).or_default().push(id.clone());
            self.by_source.entry((owner, source)).or_default().push(id.clone());
        }
        self.chunks.insert(id, ec.clone());
    }

    fn remove_source(&mut self, owner_id: &str, source_id: &str) -> usize {
        let key = (owner_id.to_string(), source_id.to_string());
        let Some(ids) = self.by_source.remove(&key) else {
            return 0;
        };
        for id in &ids {
            self.chunks.remove(id);
        }
        if let Some(order) = self.by_owner.get_mut(owner_id) {
            order.retain(|x| !ids.contains(x));
            if order.is_empty() {
                self.by_owner.remove(owner_id);
            }
        }
        ids.len()
    }

    fn unlink(&mut self, id: &str, owner_id: &str, source_id: &str) {
        if let Some(ids) = self.by_owner.get_mut(owner_id) {
            ids.retain(|x| x != id);
            if ids.is_empty() {
                self.by_owner.remove(owner_id);
            }
        }
        let key = (owner_id.to_string(), source_id.to_string());
        if let Some(ids) = self.by_source.get_mut(&key) {
            ids.retain(|x| x != id);
            if ids.is_empty() {
                self.by_source.remove(&key);
            }
        }
    }
}

/// In-memory store for tests and ephemeral sessions.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        let mut inner = self.write()?;
        for ec in chunks {
            inner.put(ec);
        }
        Ok(())
    }

    async fn delete_by_source(&self, owner_id: &str, source_id: &str) -> Result<usize> {
        Ok(self.write()?.remove_source(owner_id, source_id))
    }

    async fn replace_source(
        &self,
        owner_id: &str,
        source_id: &str,
        chunks: &[EmbeddedChunk],
        indexed_at: i64,
    ) -> Result<usize> {
        let mut inner = self.write()?;
        let removed = inner.remove_source(owner_id, source_id);
        for ec in chunks {
            inner.put(ec);
        }
        inner
            .indexed_at
            .insert((owner_id.to_string(), source_id.to_string()), indexed_at);
        Ok(removed)
    }

    async fn get_all_for_owner(&self, owner_id: &str) -> Result<Vec<EmbeddedChunk>> {
        let inner = self.read()?;
        Ok(inner
            .by_owner
            .get(owner_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.chunks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_for_source(&self, owner_id: &str, source_id: &str) -> Result<usize> {
        let inner = self.read()?;
        Ok(inner
            .by_source
            .get(&(owner_id.to_string(), source_id.to_string()))
            .map_or(0, Vec::len))
    }

    async fn indexed_at(&self, owner_id: &str, source_id: &str) -> Result<Option<i64>> {
        let inner = self.read()?;
        Ok(inner
            .indexed_at
            .get(&(owner_id.to_string(), source_id.to_string()))
            .copied())
    }

    async fn set_indexed_at(&self, owner_id: &str, source_id: &str, updated_at: i64) -> Result<()> {
        self.write()?
            .indexed_at
            .insert((owner_id.to_string(), source_id.to_string()), updated_at);
        Ok(())
    }

    async fn clear_indexed_at(&self, owner_id: &str, source_id: &str) -> Result<()> {
        self.write()?
            .indexed_at
            .remove(&(owner_id.to_string(), source_id.to_string()));
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<OwnerStats>> {
        let inner = self.read()?;
        let mut per_owner: BTreeMap<&str, OwnerStats> = BTreeMap::new();
        for ((owner, _), ids) in &inner.by_source {
            let entry = per_owner.entry(owner.as_str()).or_insert_with(|| OwnerStats {
                owner_id: owner.clone(),
                sources: 0,
                chunks: 0,
            });
            entry.sources += 1;
            entry.chunks += ids.len();
        }
        Ok(per_owner.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, SourceKind};

    fn ec(owner: &str, source: &str, index: i64, v: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                id: crate::chunk::chunk_id(owner, source, index),
                owner_id: owner.into(),
                source_id: source.into(),
                source_type: SourceKind::Note,
                source_title: source.into(),
                chunk_index: index,
                content: format!("# {}\nchunk {}", source, index),
                page_number: None,
                updated_at: 0,
                hash: String::new(),
            },
            vector: v,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_last_write_wins_in_place() {
        let store = InMemoryStore::new();
        store
            .upsert(&[ec("u", "a", 0, vec![1.0]), ec("u", "b", 0, vec![2.0])])
            .await
            .unwrap();
        store.upsert(&[ec("u", "a", 0, vec![9.0])]).await.unwrap();

        let all = store.get_all_for_owner("u").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].chunk.source_id, "a");
        assert_eq!(all[0].vector, vec![9.0]);
    }

    #[tokio::test]
    async fn test_delete_by_source_scoped_to_owner() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                ec("u", "a", 0, vec![1.0]),
                ec("u", "a", 1, vec![1.0]),
                ec("u", "b", 0, vec![1.0]),
                ec("v", "a", 0, vec![1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_by_source("u", "a").await.unwrap(), 2);
        assert_eq!(store.delete_by_source("u", "a").await.unwrap(), 0);
        assert_eq!(store.count_for_source("u", "a").await.unwrap(), 0);
        assert_eq!(store.count_for_source("u", "b").await.unwrap(), 1);
        assert_eq!(store.count_for_source("v", "a").await.unwrap(), 1);
        assert_eq!(store.get_all_for_owner("u").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_source_swaps_whole_set() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                ec("u", "a", 0, vec![1.0]),
                ec("u", "a", 1, vec![1.0]),
                ec("u", "a", 2, vec![1.0]),
                ec("u", "b", 0, vec![1.0]),
            ])
            .await
            .unwrap();

        let removed = store
            .replace_source("u", "a", &[ec("u", "a", 0, vec![5.0])], 77)
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.count_for_source("u", "a").await.unwrap(), 1);
        assert_eq!(store.count_for_source("u", "b").await.unwrap(), 1);
        assert_eq!(store.indexed_at("u", "a").await.unwrap(), Some(77));

        let all = store.get_all_for_owner("u").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].chunk.source_id, "a");
        assert_eq!(all[1].vector, vec![5.0]);
    }

    #[tokio::test]
    async fn test_indexed_at_roundtrip() {
        let store = InMemoryStore::new();
        assert_eq!(store.indexed_at("u", "a").await.unwrap(), None);
        store.set_indexed_at("u", "a", 42).await.unwrap();
        assert_eq!(store.indexed_at("u", "a").await.unwrap(), Some(42));
        store.clear_indexed_at("u", "a").await.unwrap();
        assert_eq!(store.indexed_at("u", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stats_sorted_by_owner() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                ec("zoe", "a", 0, vec![1.0]),
                ec("amy", "a", 0, vec![1.0]),
                ec("amy", "a", 1, vec![1.0]),
                ec("amy", "b", 0, vec![1.0]),
            ])
            .await
            .unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            vec![
                OwnerStats {
                    owner_id: "amy".into(),
                    sources: 2,
                    chunks: 3
                },
                OwnerStats {
                    owner_id: "zoe".into(),
                    sources: 1,
                    chunks: 1
                },
            ]
        );
        assert_eq!(store.owners().await.unwrap(), vec!["amy", "zoe"]);
    }
}
