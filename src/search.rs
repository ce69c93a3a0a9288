//! Exact similarity search over one owner's chunks.
//!
//! A linear scan: every chunk vector owned by the caller is scored against
//! the query with [`cosine_similarity`], results are sorted by descending
//! score with a stable sort (ties keep store scan order), and the first
//! `top_k` are returned. At personal-knowledge-base scale (hundreds to low
//! thousands of chunks) this is fast enough and never misses a neighbour.

use anyhow::Result;

use crate::embedding::cosine_similarity;
use crate::models::ScoredChunk;
use crate::store::VectorStore;

pub async fn search(
    store: &dyn VectorStore,
    owner_id: &str,
    query_vec: &[f32],
    top_k: usize,
) -> Result<Vec<ScoredChunk>> {
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let mut scored: Vec<ScoredChunk> = store
        .get_all_for_owner(owner_id)
        .await?
        .into_iter()
        .map(|ec| ScoredChunk {
            score: cosine_similarity(query_vec, &ec.vector),
            chunk: ec.chunk,
        })
        .collect();

    // `sort_by` is stable; scores are never NaN.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, EmbeddedChunk, SourceKind};
    use crate::store::InMemoryStore;

    fn ec(source: &str, v: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                id: format!("u:{}:0", source),
                owner_id: "u".into(),
                source_id: source.into(),
                source_type: SourceKind::Note,
                source_title: source.into(),
                chunk_index: 0,
                content: String::new(),
                page_number: None,
                updated_at: 0,
                hash: String::new(),
            },
            vector: v,
        }
    }

    #[tokio::test]
    async fn test_identical_vector_ranks_first() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                ec("a", vec![0.0, 1.0, 0.0]),
                ec("b", vec![0.6, 0.8, 0.0]),
                ec("c", vec![0.0, 0.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = search(&store, "u", &[0.6, 0.8, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.source_id, "b");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[1].chunk.source_id, "a");
    }

    #[tokio::test]
    async fn test_ties_keep_scan_order() {
        let store = InMemoryStore::new();
        store
            .upsert(&[
                ec("first", vec![1.0, 0.0]),
                ec("second", vec![1.0, 0.0]),
                ec("third", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = search(&store, "u", &[1.0, 0.0], 10).await.unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.chunk.source_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_zero_query_scores_zero() {
        let store = InMemoryStore::new();
        store.upsert(&[ec("a", vec![1.0, 2.0])]).await.unwrap();
        let results = search(&store, "u", &[0.0, 0.0], 5).await.unwrap();
        assert_eq!(results[0].score, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_owner_is_empty() {
        let store = InMemoryStore::new();
        assert!(search(&store, "nobody", &[1.0], 5).await.unwrap().is_empty());
    }
}
