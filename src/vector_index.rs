//! Cosine-similarity search over chunks, session-scoped or global.

use std::sync::Arc;

use chrono::Utc;

use crate::embedding::cosine_similarity;
use crate::error::{MemoriaError, Result};
use crate::storage::ChunkStore;
use crate::types::ChunkEmbedding;

pub struct IndexStatistics {
    pub total_chunks: usize,
    pub unique_messages: usize,
    pub unique_sessions: usize,
}

pub struct VectorIndex {
    store: Arc<dyn ChunkStore>,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    /// Atomic insert of a whole chunk set for one message. Fails with
    /// `IndexingError` (here: `MemoriaError::Indexing`) if the chunk-text and
    /// embedding counts mismatch, or embeddings have inconsistent dimension.
    pub async fn store_chunks_for_message(
        &self,
        message_id: &str,
        session_id: &str,
        chunk_texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<()> {
        if chunk_texts.len() != embeddings.len() {
            return Err(MemoriaError::Indexing(format!(
                "chunk/embedding count mismatch: {} texts, {} embeddings",
                chunk_texts.len(),
                embeddings.len()
            )));
        }

        if let Some(dim) = embeddings.iter().map(|e| e.len()).find(|d| *d != embeddings[0].len()) {
            return Err(MemoriaError::Indexing(format!(
                "inconsistent embedding dimension in batch: expected {}, found {dim}",
                embeddings[0].len()
            )));
        }

        let now = Utc::now();
        let records: Vec<ChunkEmbedding> = chunk_texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, vec))| ChunkEmbedding {
                id: 0,
                message_id: message_id.to_string(),
                session_id: session_id.to_string(),
                chunk_index: i,
                chunk_text: text,
                embedding_vector: vec,
                created_at: now,
            })
            .collect();

        self.store.save_all(records).await
    }

    pub async fn get_chunks_for_message(&self, message_id: &str) -> Result<Vec<ChunkEmbedding>> {
        self.store.find_by_message_id(message_id).await
    }

    pub async fn get_chunks_for_session(&self, session_id: &str) -> Result<Vec<ChunkEmbedding>> {
        self.store.find_by_session_id(session_id).await
    }

    /// Descending-cosine search, session-scoped when `session_id` is given,
    /// global otherwise. Chunks with a missing or wrong-dimensional
    /// embedding are skipped; ties are broken by insertion (storage) order.
    pub async fn find_similar(
        &self,
        query_embedding: &[f32],
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChunkEmbedding>> {
        let candidates = match session_id {
            Some(sid) => self.store.find_by_session_id(sid).await?,
            None => self.store.find_all().await?,
        };

        Ok(self.rank(candidates, query_embedding, limit, None))
    }

    /// Same as `find_similar` but keeps everything at or above `threshold`
    /// rather than truncating to a fixed limit.
    pub async fn find_similar_within_threshold(
        &self,
        query_embedding: &[f32],
        session_id: Option<&str>,
        threshold: f32,
    ) -> Result<Vec<ChunkEmbedding>> {
        let candidates = match session_id {
            Some(sid) => self.store.find_by_session_id(sid).await?,
            None => self.store.find_all().await?,
        };

        Ok(self.rank(candidates, query_embedding, usize::MAX, Some(threshold)))
    }

    fn rank(
        &self,
        candidates: Vec<ChunkEmbedding>,
        query: &[f32],
        limit: usize,
        threshold: Option<f32>,
    ) -> Vec<ChunkEmbedding> {
        let dim = query.len();
        let mut scored: Vec<(usize, f32, ChunkEmbedding)> = candidates
            .into_iter()
            .enumerate()
            .filter(|(_, c)| !c.embedding_vector.is_empty() && c.embedding_vector.len() == dim)
            .map(|(idx, c)| {
                let score = cosine_similarity(query, &c.embedding_vector);
                (idx, score, c)
            })
            .filter(|(_, score, _)| threshold.map(|t| *score >= t).unwrap_or(true))
            .collect();

        // Stable sort by descending score; ties keep insertion order because
        // the original index is the secondary key.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));

        scored.into_iter().take(limit).map(|(_, _, c)| c).collect()
    }

    pub async fn delete_chunks_for_message(&self, message_id: &str) -> Result<()> {
        self.store.delete_by_message_id(message_id).await
    }

    pub async fn delete_chunks_for_session(&self, session_id: &str) -> Result<()> {
        self.store.delete_by_session_id(session_id).await
    }

    pub async fn statistics(&self) -> Result<IndexStatistics> {
        let all = self.store.find_all().await?;
        let total_chunks = all.len();
        let mut messages = std::collections::HashSet::new();
        let mut sessions = std::collections::HashSet::new();
        for c in &all {
            messages.insert(c.message_id.clone());
            sessions.insert(c.session_id.clone());
        }
        Ok(IndexStatistics {
            total_chunks,
            unique_messages: messages.len(),
            unique_sessions: sessions.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryChunkStore;

    fn idx() -> VectorIndex {
        VectorIndex::new(Arc::new(InMemoryChunkStore::new()))
    }

    #[tokio::test]
    async fn store_rejects_count_mismatch() {
        let vi = idx();
        let err = vi
            .store_chunks_for_message("m1", "s1", vec!["a".into(), "b".into()], vec![vec![1.0, 0.0]])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoriaError::Indexing(_)));
    }

    #[tokio::test]
    async fn find_similar_orders_by_cosine_descending() {
        let vi = idx();
        vi.store_chunks_for_message(
            "m1",
            "s1",
            vec!["a".into(), "b".into()],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .await
        .unwrap();

        let results = vi.find_similar(&[1.0, 0.0], Some("s1"), 10).await.unwrap();
        assert_eq!(results[0].chunk_text, "a");
    }

    #[tokio::test]
    async fn find_similar_scopes_by_session() {
        let vi = idx();
        vi.store_chunks_for_message("m1", "s1", vec!["a".into()], vec![vec![1.0, 0.0]])
            .await
            .unwrap();
        vi.store_chunks_for_message("m2", "s2", vec!["b".into()], vec![vec![1.0, 0.0]])
            .await
            .unwrap();

        let results = vi.find_similar(&[1.0, 0.0], Some("s1"), 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message_id, "m1");
    }

    #[tokio::test]
    async fn skips_wrong_dimension_chunks() {
        let vi = idx();
        vi.store_chunks_for_message("m1", "s1", vec!["a".into()], vec![vec![1.0, 0.0, 0.0]])
            .await
            .unwrap();
        let results = vi.find_similar(&[1.0, 0.0], Some("s1"), 10).await.unwrap();
        assert!(results.is_empty());
    }
}
