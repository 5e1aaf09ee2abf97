//! End-to-end turn handling: persist → retrieve → build prompt → generate →
//! persist → index.

use std::sync::Arc;

use chrono::Utc;

use crate::chunker;
use crate::config::Config;
use crate::context::merge_groups;
use crate::context::retriever::{ContextRetriever, RetrievalConfig};
use crate::embedding::queue::{IndexingQueue, IndexingRequest};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::extraction::KeyInformationExtractor;
use crate::generator::Generator;
use crate::prompt::PromptBuilder;
use crate::storage::{last_message, MessageStore};
use crate::types::{Message, Role};
use crate::window::WindowManager;

pub struct Orchestrator {
    message_store: Arc<dyn MessageStore>,
    window_manager: Arc<WindowManager>,
    retriever: Arc<ContextRetriever>,
    extractor: Arc<KeyInformationExtractor>,
    generator: Arc<dyn Generator>,
    prompt_builder: PromptBuilder,
    indexing_queue: Arc<IndexingQueue>,
    retrieval_config: RetrievalConfig,
    generator_model: String,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_store: Arc<dyn MessageStore>,
        window_manager: Arc<WindowManager>,
        retriever: Arc<ContextRetriever>,
        extractor: Arc<KeyInformationExtractor>,
        generator: Arc<dyn Generator>,
        indexing_queue: Arc<IndexingQueue>,
        config: &Config,
    ) -> Self {
        Self {
            message_store,
            window_manager,
            retriever,
            extractor,
            generator,
            prompt_builder: PromptBuilder::new(config.prompt_max_length, config.prompt_enable_truncation),
            indexing_queue,
            retrieval_config: RetrievalConfig {
                chunks_before: config.context_chunks_before,
                chunks_after: config.context_chunks_after,
                max_similar: config.context_max_similar,
                similarity_threshold: config.context_similarity_threshold,
                strategy: config.context_retrieval_strategy,
            },
            generator_model: config.generator_model.clone(),
        }
    }

    /// `handleUserTurn(text, sessionId) -> assistantMessage`. Every step
    /// except the generator call degrades to "no context" on failure rather
    /// than failing the turn; a generator failure bubbles as a fatal error.
    pub async fn handle_user_turn(&self, text: &str, session_id: &str) -> Result<Message> {
        let t_user = Utc::now();

        let parent_id = match self.message_store.find_by_session_id(session_id).await {
            Ok(existing) => last_message(&existing).map(|m| m.id.clone()),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "failed to load session history for parent lookup");
                None
            }
        };

        let mut user_msg = Message::new(session_id, Role::User, text, parent_id);
        user_msg.timestamp = t_user;

        self.message_store.save(user_msg.clone()).await?;

        self.queue_indexing(&user_msg).await;

        if let Err(e) = self.window_manager.add_message(session_id, user_msg.clone()).await {
            tracing::warn!(session_id, error = %e, "failed to add user message to conversation window");
        }

        let ctx = self.window_manager.get_conversation_context(session_id);

        let key_info = self.extractor.extract(&user_msg, session_id).await;

        let groups = self
            .retriever
            .retrieve(text, session_id, Some(user_msg.id.as_str()), &self.retrieval_config)
            .await
            .unwrap_or_default();
        let merged = merge_groups(groups);

        let prompt = self.prompt_builder.build(text, &ctx, &key_info, &merged);

        let response = self.generator.generate(&prompt, Default::default()).await?;

        let t_assistant = Utc::now();
        let mut assistant_msg = Message::new(session_id, Role::Assistant, response, Some(user_msg.id.clone()));
        assistant_msg.timestamp = t_assistant;
        assistant_msg
            .metadata
            .insert("model".to_string(), serde_json::json!(self.generator_model));
        assistant_msg.metadata.insert(
            "responseTimeMs".to_string(),
            serde_json::json!((t_assistant - t_user).num_milliseconds()),
        );

        self.message_store.save(assistant_msg.clone()).await?;

        self.queue_indexing(&assistant_msg).await;

        if let Err(e) = self.window_manager.add_message(session_id, assistant_msg.clone()).await {
            tracing::warn!(session_id, error = %e, "failed to add assistant message to conversation window");
        }

        Ok(assistant_msg)
    }

    async fn queue_indexing(&self, message: &Message) {
        let request = IndexingRequest {
            message_id: message.id.clone(),
            session_id: message.session_id.clone(),
            text: message.content.clone(),
        };
        if let Err(e) = self.indexing_queue.queue(request).await {
            tracing::warn!(message_id = %message.id, error = %e, "failed to enqueue message for indexing");
        }
    }
}

/// Used only to size an embedder's output in code paths that need a default
/// chunking pass without going through the queue (administrative reindexing).
pub async fn reindex_message(embedder: &dyn Embedder, target_tokens: usize, overlap_tokens: usize, text: &str) -> Vec<(String, Vec<f32>)> {
    let chunks = chunker::chunk(text, target_tokens, overlap_tokens, true);
    let mut out = Vec::with_capacity(chunks.len());
    for chunk_text in chunks {
        if let Ok(embedding) = embedder.embed(&chunk_text).await {
            out.push((chunk_text, embedding));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HttpEmbedder;
    use crate::generator::NullGenerator;
    use crate::storage::InMemoryMessageStore;
    use crate::summary::SummaryService;
    use crate::vector_index::VectorIndex;
    use std::time::Duration;

    fn orchestrator_with_failing_generator() -> Orchestrator {
        let config = Config::default();
        let message_store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
        let generator: Arc<dyn Generator> = Arc::new(NullGenerator);
        let summary_service = Arc::new(SummaryService::new(generator.clone(), 4000));
        let window_manager = Arc::new(WindowManager::new(summary_service, config.conversation_window_size, config.conversation_retention_hours));
        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new("http://localhost:0", "m", Duration::from_millis(50)));
        let chunk_store = Arc::new(crate::storage::InMemoryChunkStore::new());
        let vector_index = Arc::new(VectorIndex::new(chunk_store));
        let retriever = Arc::new(ContextRetriever::new(embedder, vector_index, window_manager.clone()));
        let extractor = Arc::new(KeyInformationExtractor::with_defaults(generator.clone()));
        let indexing_queue = Arc::new(IndexingQueue::new(16));

        Orchestrator::new(message_store, window_manager, retriever, extractor, generator, indexing_queue, &config)
    }

    #[tokio::test]
    async fn generator_failure_bubbles_as_turn_error() {
        let orchestrator = orchestrator_with_failing_generator();
        let result = orchestrator.handle_user_turn("hello there", "s1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn user_message_is_persisted_even_when_generator_fails() {
        let orchestrator = orchestrator_with_failing_generator();
        let _ = orchestrator.handle_user_turn("hello there", "s1").await;
        let messages = orchestrator.message_store.find_by_session_id("s1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }
}
