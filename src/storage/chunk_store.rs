//! Chunk store: CRUD over chunk+embedding records indexed by messageId,
//! sessionId. Embedding vectors round-trip bit-exact via little-endian f32
//! byte encoding so cosine scores stay reproducible.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::types::ChunkEmbedding;

#[async_trait::async_trait]
pub trait ChunkStore: Send + Sync {
    async fn save_all(&self, chunks: Vec<ChunkEmbedding>) -> Result<()>;
    async fn find_by_message_id(&self, message_id: &str) -> Result<Vec<ChunkEmbedding>>;
    async fn find_by_session_id(&self, session_id: &str) -> Result<Vec<ChunkEmbedding>>;
    async fn find_all(&self) -> Result<Vec<ChunkEmbedding>>;
    async fn count(&self) -> Result<usize>;
    async fn count_by_message_id(&self, message_id: &str) -> Result<usize>;
    async fn count_by_session_id(&self, session_id: &str) -> Result<usize>;
    async fn delete_by_message_id(&self, message_id: &str) -> Result<()>;
    async fn delete_by_session_id(&self, session_id: &str) -> Result<()>;
}

pub fn encode_embedding(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[derive(Default)]
pub struct InMemoryChunkStore {
    next_id: std::sync::atomic::AtomicI64,
    by_message: RwLock<HashMap<String, Vec<ChunkEmbedding>>>,
    by_session: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn save_all(&self, mut chunks: Vec<ChunkEmbedding>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut by_message = self.by_message.write();
        let mut by_session = self.by_session.write();
        for chunk in chunks.iter_mut() {
            if chunk.id == 0 {
                chunk.id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            }
            by_session
                .entry(chunk.session_id.clone())
                .or_default()
                .push(chunk.message_id.clone());
        }
        for chunk in chunks {
            let entry = by_message.entry(chunk.message_id.clone()).or_default();
            if let Some(existing) = entry.iter_mut().find(|c| c.chunk_index == chunk.chunk_index) {
                *existing = chunk;
            } else {
                entry.push(chunk);
            }
        }
        Ok(())
    }

    async fn find_by_message_id(&self, message_id: &str) -> Result<Vec<ChunkEmbedding>> {
        let mut chunks = self
            .by_message
            .read()
            .get(message_id)
            .cloned()
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Vec<ChunkEmbedding>> {
        let message_ids: Vec<String> = {
            let mut ids = self.by_session.read().get(session_id).cloned().unwrap_or_default();
            ids.sort();
            ids.dedup();
            ids
        };
        let by_message = self.by_message.read();
        let mut result = Vec::new();
        for mid in message_ids {
            if let Some(chunks) = by_message.get(&mid) {
                result.extend(chunks.iter().cloned());
            }
        }
        result.sort_by(|a, b| (a.message_id.clone(), a.chunk_index).cmp(&(b.message_id.clone(), b.chunk_index)));
        Ok(result)
    }

    async fn find_all(&self) -> Result<Vec<ChunkEmbedding>> {
        Ok(self.by_message.read().values().flatten().cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.by_message.read().values().map(|v| v.len()).sum())
    }

    async fn count_by_message_id(&self, message_id: &str) -> Result<usize> {
        Ok(self.by_message.read().get(message_id).map(|v| v.len()).unwrap_or(0))
    }

    async fn count_by_session_id(&self, session_id: &str) -> Result<usize> {
        Ok(self.find_by_session_id(session_id).await?.len())
    }

    async fn delete_by_message_id(&self, message_id: &str) -> Result<()> {
        self.by_message.write().remove(message_id);
        Ok(())
    }

    async fn delete_by_session_id(&self, session_id: &str) -> Result<()> {
        if let Some(ids) = self.by_session.write().remove(session_id) {
            let mut by_message = self.by_message.write();
            for id in ids {
                by_message.remove(&id);
            }
        }
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    use super::*;
    use crate::storage::connection::Storage;
    use chrono::{DateTime, Utc};
    use rusqlite::params;

    pub struct SqliteChunkStore {
        storage: Arc<Storage>,
    }

    impl SqliteChunkStore {
        pub fn new(storage: Arc<Storage>) -> Self {
            Self { storage }
        }
    }

    fn row_to_chunk(
        id: i64,
        message_id: String,
        session_id: String,
        chunk_index: i64,
        chunk_text: String,
        embedding: Vec<u8>,
        created_at: String,
    ) -> ChunkEmbedding {
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        ChunkEmbedding {
            id,
            message_id,
            session_id,
            chunk_index: chunk_index as usize,
            chunk_text,
            embedding_vector: decode_embedding(&embedding),
            created_at,
        }
    }

    #[async_trait::async_trait]
    impl ChunkStore for SqliteChunkStore {
        async fn save_all(&self, chunks: Vec<ChunkEmbedding>) -> Result<()> {
            if chunks.is_empty() {
                return Ok(());
            }
            self.storage.with_transaction(|tx| {
                for chunk in &chunks {
                    tx.execute(
                        "INSERT INTO chunk_embeddings (message_id, session_id, chunk_index, chunk_text, embedding, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(message_id, chunk_index) DO UPDATE SET
                            chunk_text = excluded.chunk_text,
                            embedding = excluded.embedding,
                            created_at = excluded.created_at",
                        params![
                            chunk.message_id,
                            chunk.session_id,
                            chunk.chunk_index as i64,
                            chunk.chunk_text,
                            encode_embedding(&chunk.embedding_vector),
                            chunk.created_at.to_rfc3339(),
                        ],
                    )?;
                }
                Ok(())
            })
        }

        async fn find_by_message_id(&self, message_id: &str) -> Result<Vec<ChunkEmbedding>> {
            self.storage.with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, message_id, session_id, chunk_index, chunk_text, embedding, created_at
                     FROM chunk_embeddings WHERE message_id = ?1 ORDER BY chunk_index ASC",
                )?;
                let rows = stmt.query_map(params![message_id], |row| {
                    Ok(row_to_chunk(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                })?;
                Ok(rows.filter_map(|r| r.ok()).collect())
            })
        }

        async fn find_by_session_id(&self, session_id: &str) -> Result<Vec<ChunkEmbedding>> {
            self.storage.with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, message_id, session_id, chunk_index, chunk_text, embedding, created_at
                     FROM chunk_embeddings WHERE session_id = ?1 ORDER BY message_id ASC, chunk_index ASC",
                )?;
                let rows = stmt.query_map(params![session_id], |row| {
                    Ok(row_to_chunk(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                })?;
                Ok(rows.filter_map(|r| r.ok()).collect())
            })
        }

        async fn find_all(&self) -> Result<Vec<ChunkEmbedding>> {
            self.storage.with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, message_id, session_id, chunk_index, chunk_text, embedding, created_at
                     FROM chunk_embeddings",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(row_to_chunk(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                })?;
                Ok(rows.filter_map(|r| r.ok()).collect())
            })
        }

        async fn count(&self) -> Result<usize> {
            self.storage.with_connection(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM chunk_embeddings", [], |r| r.get(0))?;
                Ok(n as usize)
            })
        }

        async fn count_by_message_id(&self, message_id: &str) -> Result<usize> {
            self.storage.with_connection(|conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM chunk_embeddings WHERE message_id = ?1",
                    params![message_id],
                    |r| r.get(0),
                )?;
                Ok(n as usize)
            })
        }

        async fn count_by_session_id(&self, session_id: &str) -> Result<usize> {
            self.storage.with_connection(|conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM chunk_embeddings WHERE session_id = ?1",
                    params![session_id],
                    |r| r.get(0),
                )?;
                Ok(n as usize)
            })
        }

        async fn delete_by_message_id(&self, message_id: &str) -> Result<()> {
            self.storage.with_connection(|conn| {
                conn.execute("DELETE FROM chunk_embeddings WHERE message_id = ?1", params![message_id])?;
                Ok(())
            })
        }

        async fn delete_by_session_id(&self, session_id: &str) -> Result<()> {
            self.storage.with_connection(|conn| {
                conn.execute("DELETE FROM chunk_embeddings WHERE session_id = ?1", params![session_id])?;
                Ok(())
            })
        }
    }
}
