//! Async chunk+embed indexing queue: the background half of "kick off async
//! indexing of the message" from the orchestrator.

use std::sync::Arc;

use crate::chunker;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::vector_index::VectorIndex;

#[derive(Debug, Clone)]
pub struct IndexingRequest {
    pub message_id: String,
    pub session_id: String,
    pub text: String,
}

/// Bounded async queue of pending indexing requests.
#[derive(Clone)]
pub struct IndexingQueue {
    sender: async_channel::Sender<IndexingRequest>,
    receiver: async_channel::Receiver<IndexingRequest>,
}

impl IndexingQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = async_channel::bounded(capacity);
        Self { sender, receiver }
    }

    pub async fn queue(&self, request: IndexingRequest) -> Result<()> {
        self.sender
            .send(request)
            .await
            .map_err(|e| crate::error::MemoriaError::Indexing(format!("queue closed: {e}")))
    }

    pub fn queue_blocking(&self, request: IndexingRequest) -> Result<()> {
        self.sender
            .send_blocking(request)
            .map_err(|e| crate::error::MemoriaError::Indexing(format!("queue closed: {e}")))
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn receiver(&self) -> async_channel::Receiver<IndexingRequest> {
        self.receiver.clone()
    }
}

/// Worker that drains the indexing queue: chunk, embed each chunk, store the
/// batch atomically. A single upstream embedder failure drops that
/// message's indexing silently (upstream-semantic soft failure, per the
/// error-handling policy) rather than failing the worker loop.
pub struct IndexingWorker {
    receiver: async_channel::Receiver<IndexingRequest>,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<VectorIndex>,
    target_tokens: usize,
    overlap_tokens: usize,
}

impl IndexingWorker {
    pub fn new(
        queue: &IndexingQueue,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<VectorIndex>,
        target_tokens: usize,
        overlap_tokens: usize,
    ) -> Self {
        Self {
            receiver: queue.receiver(),
            embedder,
            vector_index,
            target_tokens,
            overlap_tokens,
        }
    }

    /// Run until the queue's sender side is dropped.
    pub async fn run(self) {
        loop {
            match self.receiver.recv().await {
                Ok(request) => {
                    if let Err(e) = self.process(request).await {
                        tracing::warn!(error = %e, "indexing request failed, message left unindexed");
                    }
                }
                Err(_) => break,
            }
        }
    }

    async fn process(&self, request: IndexingRequest) -> Result<()> {
        let chunks = chunker::chunk(&request.text, self.target_tokens, self.overlap_tokens, true);
        if chunks.is_empty() {
            return Ok(());
        }

        let mut embeddings = Vec::with_capacity(chunks.len());
        for text in &chunks {
            let embedding = self.embedder.embed(text).await?;
            embeddings.push(embedding);
        }

        self.vector_index
            .store_chunks_for_message(&request.message_id, &request.session_id, chunks, embeddings)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryChunkStore;
    use async_trait::async_trait;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn dimensions(&self) -> Option<usize> {
            Some(2)
        }
    }

    #[tokio::test]
    async fn worker_indexes_queued_message() {
        let queue = IndexingQueue::new(10);
        let vector_index = Arc::new(VectorIndex::new(Arc::new(InMemoryChunkStore::new())));
        let worker = IndexingWorker::new(&queue, Arc::new(FixedEmbedder), vector_index.clone(), 256, 50);

        queue
            .queue(IndexingRequest {
                message_id: "m1".into(),
                session_id: "s1".into(),
                text: "hello world".into(),
            })
            .await
            .unwrap();
        drop(queue);

        worker.run().await;

        let chunks = vector_index.get_chunks_for_message("m1").await.unwrap();
        assert_eq!(chunks.len(), 1);
    }
}
