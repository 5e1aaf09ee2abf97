//! Given a new user message, finds semantically relevant historical chunks,
//! expands each hit with neighbors, and returns a deduplicated ordered set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::embedding::Embedder;
use crate::error::{MemoriaError, Result};
use crate::types::{ChunkEmbedding, ExpandedChunkGroup, RetrievalStrategy, Role};
use crate::vector_index::VectorIndex;
use crate::window::WindowManager;

const FIRST_PERSON_MARKERS: &[&str] = &[
    "i", "i'm", "im", "i've", "ive", "i'd", "id", "i'll", "ill", "my", "mine", "me", "we", "we're",
    "were", "our", "ours", "us",
];

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub chunks_before: usize,
    pub chunks_after: usize,
    pub max_similar: usize,
    pub similarity_threshold: f32,
    pub strategy: RetrievalStrategy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunks_before: 2,
            chunks_after: 2,
            max_similar: 5,
            similarity_threshold: 0.3,
            strategy: RetrievalStrategy::Adaptive,
        }
    }
}

impl RetrievalConfig {
    fn validate(&self) -> Result<()> {
        if self.chunks_before > 10 {
            return Err(MemoriaError::Validation("chunks_before must be in [0, 10]".into()));
        }
        if self.chunks_after > 10 {
            return Err(MemoriaError::Validation("chunks_after must be in [0, 10]".into()));
        }
        if self.max_similar < 1 || self.max_similar > 20 {
            return Err(MemoriaError::Validation("max_similar must be in [1, 20]".into()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(MemoriaError::Validation("similarity_threshold must be in [0.0, 1.0]".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RetrievalMetricsSnapshot {
    pub retrieval_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

#[derive(Default)]
struct SessionMetrics {
    retrieval_count: u64,
    total_duration: Duration,
    error_count: u64,
}

pub struct ContextRetriever {
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<VectorIndex>,
    window_manager: Arc<WindowManager>,
    metrics: Mutex<HashMap<String, SessionMetrics>>,
}

impl ContextRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, vector_index: Arc<VectorIndex>, window_manager: Arc<WindowManager>) -> Self {
        Self {
            embedder,
            vector_index,
            window_manager,
            metrics: Mutex::new(HashMap::new()),
        }
    }

    pub fn metrics_for(&self, session_id: &str) -> RetrievalMetricsSnapshot {
        self.metrics
            .lock()
            .get(session_id)
            .map(|m| RetrievalMetricsSnapshot {
                retrieval_count: m.retrieval_count,
                total_duration_ms: m.total_duration.as_millis() as u64,
                error_count: m.error_count,
            })
            .unwrap_or_default()
    }

    fn record(&self, session_id: &str, elapsed: Duration, errored: bool) {
        let mut metrics = self.metrics.lock();
        let entry = metrics.entry(session_id.to_string()).or_default();
        entry.retrieval_count += 1;
        entry.total_duration += elapsed;
        if errored {
            entry.error_count += 1;
        }
    }

    /// `retrieve(userMessage, sessionId, excludeMessageId, config)`.
    /// Out-of-range parameters are rejected synchronously before any I/O.
    /// Any other failure during retrieval is caught, recorded, and degrades
    /// to an empty sequence so the turn proceeds without historical context.
    pub async fn retrieve(
        &self,
        user_message: &str,
        session_id: &str,
        exclude_message_id: Option<&str>,
        config: &RetrievalConfig,
    ) -> Result<Vec<ExpandedChunkGroup>> {
        config.validate()?;

        let start = Instant::now();
        match self.retrieve_inner(user_message, session_id, exclude_message_id, config).await {
            Ok(groups) => {
                self.record(session_id, start.elapsed(), false);
                Ok(groups)
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "retrieval failed, degrading to empty context");
                self.record(session_id, start.elapsed(), true);
                Ok(Vec::new())
            }
        }
    }

    async fn retrieve_inner(
        &self,
        user_message: &str,
        session_id: &str,
        exclude_message_id: Option<&str>,
        config: &RetrievalConfig,
    ) -> Result<Vec<ExpandedChunkGroup>> {
        let query_embedding = self.embedder.embed(user_message).await?;

        let mut exclusion: HashSet<String> = self.window_manager.recent_message_ids(session_id).into_iter().collect();
        if let Some(id) = exclude_message_id {
            exclusion.insert(id.to_string());
        }

        match config.strategy {
            RetrievalStrategy::Fixed => {
                self.retrieve_fixed(&query_embedding, session_id, &exclusion, config.max_similar, config.similarity_threshold, config)
                    .await
            }
            RetrievalStrategy::Adaptive => {
                self.retrieve_adaptive(&query_embedding, session_id, &exclusion, config).await
            }
            RetrievalStrategy::Intelligent => {
                self.retrieve_intelligent(&query_embedding, session_id, &exclusion, config).await
            }
        }
    }

    async fn retrieve_adaptive(
        &self,
        query_embedding: &[f32],
        session_id: &str,
        exclusion: &HashSet<String>,
        config: &RetrievalConfig,
    ) -> Result<Vec<ExpandedChunkGroup>> {
        let mut max_similar = config.max_similar.min(3);
        let mut threshold = config.similarity_threshold.max(0.5);

        for attempt in 0..3 {
            let groups = self
                .retrieve_fixed(query_embedding, session_id, exclusion, max_similar, threshold, config)
                .await?;
            if !groups.is_empty() || attempt == 2 {
                return Ok(groups);
            }
            max_similar = ((max_similar as f32 * 1.5) as usize).min(10).max(max_similar + 1);
            threshold = (threshold * 0.8).max(0.1);
        }

        Ok(Vec::new())
    }

    async fn retrieve_intelligent(
        &self,
        query_embedding: &[f32],
        session_id: &str,
        exclusion: &HashSet<String>,
        config: &RetrievalConfig,
    ) -> Result<Vec<ExpandedChunkGroup>> {
        let mut seen = HashSet::new();
        let mut combined = Vec::new();
        for threshold in [0.8, 0.6, 0.4] {
            let groups = self
                .retrieve_fixed(query_embedding, session_id, exclusion, config.max_similar, threshold, config)
                .await?;
            for g in groups {
                if seen.insert(g.message_id.clone()) {
                    combined.push(g);
                }
            }
        }
        Ok(combined)
    }

    /// Runs the common sub-steps once with the given parameters: similarity
    /// search, exclusion, relevance filter, and neighbor expansion.
    async fn retrieve_fixed(
        &self,
        query_embedding: &[f32],
        session_id: &str,
        exclusion: &HashSet<String>,
        max_similar: usize,
        threshold: f32,
        config: &RetrievalConfig,
    ) -> Result<Vec<ExpandedChunkGroup>> {
        let similar = self
            .vector_index
            .find_similar_within_threshold(query_embedding, Some(session_id), threshold)
            .await?;
        let similar: Vec<ChunkEmbedding> = similar.into_iter().take(max_similar).collect();

        let surviving: Vec<ChunkEmbedding> = similar.into_iter().filter(|c| !exclusion.contains(&c.message_id)).collect();

        let filtered = apply_relevance_filter(surviving);

        self.expand(filtered, session_id, config.chunks_before, config.chunks_after).await
    }

    async fn expand(
        &self,
        chunks: Vec<ChunkEmbedding>,
        _session_id: &str,
        before: usize,
        after: usize,
    ) -> Result<Vec<ExpandedChunkGroup>> {
        let mut seen = HashSet::new();
        let mut groups = Vec::new();

        for chunk in chunks {
            if !seen.insert(chunk.message_id.clone()) {
                continue;
            }

            let mut all_chunks = self.vector_index.get_chunks_for_message(&chunk.message_id).await?;
            all_chunks.sort_by_key(|c| c.chunk_index);

            if all_chunks.is_empty() {
                continue;
            }

            let idx = all_chunks
                .iter()
                .position(|c| c.chunk_index == chunk.chunk_index)
                .unwrap_or(0);
            let lo = idx.saturating_sub(before);
            let hi = (idx + after).min(all_chunks.len() - 1);

            let group_chunks: Vec<ChunkEmbedding> = all_chunks[lo..=hi].to_vec();

            groups.push(ExpandedChunkGroup {
                message_id: chunk.message_id.clone(),
                role: Role::User,
                chunks: group_chunks,
            });
        }

        Ok(groups)
    }
}

/// Keep chunks whose trimmed text length > 10 AND either contain a
/// first-person marker or contain > 3 whitespace-separated tokens; cap to at
/// most 5; if empty but the pre-filter set was non-empty, retain the single
/// top chunk.
fn apply_relevance_filter(chunks: Vec<ChunkEmbedding>) -> Vec<ChunkEmbedding> {
    if chunks.is_empty() {
        return chunks;
    }

    let filtered: Vec<ChunkEmbedding> = chunks
        .iter()
        .filter(|c| {
            let trimmed = c.chunk_text.trim();
            if trimmed.len() <= 10 {
                return false;
            }
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            let has_first_person = tokens.iter().any(|t| {
                let lower = t.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'').to_lowercase();
                FIRST_PERSON_MARKERS.contains(&lower.as_str())
            });
            has_first_person || tokens.len() > 3
        })
        .cloned()
        .take(5)
        .collect();

    if filtered.is_empty() {
        vec![chunks[0].clone()]
    } else {
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> ChunkEmbedding {
        ChunkEmbedding {
            id: 1,
            message_id: "m1".into(),
            session_id: "s1".into(),
            chunk_index: 0,
            chunk_text: text.into(),
            embedding_vector: vec![1.0, 0.0],
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn relevance_filter_drops_short_fragments() {
        let chunks = vec![chunk("."), chunk("ok")];
        let filtered = apply_relevance_filter(chunks.clone());
        // nothing passes the length/word-count bar, so the top chunk is retained
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk_text, chunks[0].chunk_text);
    }

    #[test]
    fn relevance_filter_keeps_first_person_or_long_text() {
        let chunks = vec![chunk("I really need help with this project today")];
        let filtered = apply_relevance_filter(chunks);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn config_validation_rejects_out_of_range() {
        let config = RetrievalConfig { chunks_before: 11, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
