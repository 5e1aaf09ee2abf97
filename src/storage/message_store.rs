//! Message store: CRUD over messages indexed by id, sessionId, parentMessageId.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::Result;
use crate::types::Message;

/// Contract from the external-interfaces section: `save`, `findById`,
/// `findBySessionId`, `findAll`, `deleteAll`, plus the session-scoped delete
/// needed for the administrative "clear session" operation.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(&self, message: Message) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Message>>;
    async fn find_by_session_id(&self, session_id: &str) -> Result<Vec<Message>>;
    async fn find_all(&self) -> Result<Vec<Message>>;
    async fn delete_all(&self) -> Result<()>;
    async fn delete_by_session_id(&self, session_id: &str) -> Result<()>;
}

/// In-memory reference implementation: a session index plus an id index so
/// both indexed lookups named in the contract run in better-than-O(n) time.
#[derive(Default)]
pub struct InMemoryMessageStore {
    by_id: RwLock<HashMap<String, Message>>,
    by_session: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save(&self, message: Message) -> Result<()> {
        let id = message.id.clone();
        let session_id = message.session_id.clone();
        self.by_id.write().insert(id.clone(), message);
        self.by_session.write().entry(session_id).or_default().push(id);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
        Ok(self.by_id.read().get(id).cloned())
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Vec<Message>> {
        let by_id = self.by_id.read();
        let ids = self.by_session.read();
        let mut messages: Vec<Message> = ids
            .get(session_id)
            .into_iter()
            .flatten()
            .filter_map(|id| by_id.get(id).cloned())
            .collect();
        messages.sort_by_key(|m: &Message| m.timestamp);
        Ok(messages)
    }

    async fn find_all(&self) -> Result<Vec<Message>> {
        let mut all: Vec<Message> = self.by_id.read().values().cloned().collect();
        all.sort_by_key(|m: &Message| m.timestamp);
        Ok(all)
    }

    async fn delete_all(&self) -> Result<()> {
        self.by_id.write().clear();
        self.by_session.write().clear();
        Ok(())
    }

    async fn delete_by_session_id(&self, session_id: &str) -> Result<()> {
        if let Some(ids) = self.by_session.write().remove(session_id) {
            let mut by_id = self.by_id.write();
            for id in ids {
                by_id.remove(&id);
            }
        }
        Ok(())
    }
}

/// Find the "last message in a session": by (timestamp desc, has-parent desc,
/// id desc), per the design note on sidestepping ties with monotonic
/// timestamps where possible.
pub fn last_message<'a>(messages: &'a [Message]) -> Option<&'a Message> {
    messages.iter().max_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.parent_message_id.is_some().cmp(&b.parent_message_id.is_some()))
            .then_with(|| a.id.cmp(&b.id))
    })
}

pub fn is_stale(last_activity: Option<DateTime<Utc>>, retention_hours: i64) -> bool {
    match last_activity {
        None => false,
        Some(t) => Utc::now().signed_duration_since(t).num_hours() >= retention_hours,
    }
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    use super::*;
    use crate::storage::connection::Storage;
    use chrono::TimeZone;
    use rusqlite::params;
    use std::collections::HashMap as StdHashMap;

    pub struct SqliteMessageStore {
        storage: Arc<Storage>,
    }

    impl SqliteMessageStore {
        pub fn new(storage: Arc<Storage>) -> Self {
            Self { storage }
        }

        fn row_to_message(
            id: String,
            session_id: String,
            role: String,
            content: String,
            timestamp: String,
            parent_message_id: Option<String>,
            metadata: String,
        ) -> Message {
            let ts = DateTime::parse_from_rfc3339(&timestamp)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let metadata: StdHashMap<String, serde_json::Value> =
                serde_json::from_str(&metadata).unwrap_or_default();
            Message {
                id,
                session_id,
                role: role.parse().unwrap_or(crate::types::Role::User),
                content,
                timestamp: ts,
                parent_message_id,
                metadata,
            }
        }
    }

    #[async_trait::async_trait]
    impl MessageStore for SqliteMessageStore {
        async fn save(&self, message: Message) -> Result<()> {
            let metadata = serde_json::to_string(&message.metadata)?;
            self.storage.with_connection(|conn| {
                conn.execute(
                    "INSERT INTO messages (id, session_id, role, content, timestamp, parent_message_id, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        message.id,
                        message.session_id,
                        message.role.to_string(),
                        message.content,
                        message.timestamp.to_rfc3339(),
                        message.parent_message_id,
                        metadata,
                    ],
                )?;
                Ok(())
            })
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
            self.storage.with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, role, content, timestamp, parent_message_id, metadata
                     FROM messages WHERE id = ?1",
                )?;
                let mut rows = stmt.query(params![id])?;
                if let Some(row) = rows.next()? {
                    Ok(Some(Self::row_to_message(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    )))
                } else {
                    Ok(None)
                }
            })
        }

        async fn find_by_session_id(&self, session_id: &str) -> Result<Vec<Message>> {
            self.storage.with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, role, content, timestamp, parent_message_id, metadata
                     FROM messages WHERE session_id = ?1 ORDER BY timestamp ASC",
                )?;
                let rows = stmt.query_map(params![session_id], |row| {
                    Ok(Self::row_to_message(
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

        async fn find_all(&self) -> Result<Vec<Message>> {
            self.storage.with_connection(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, role, content, timestamp, parent_message_id, metadata
                     FROM messages ORDER BY timestamp ASC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(Self::row_to_message(
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

        async fn delete_all(&self) -> Result<()> {
            self.storage.with_connection(|conn| {
                conn.execute("DELETE FROM messages", [])?;
                Ok(())
            })
        }

        async fn delete_by_session_id(&self, session_id: &str) -> Result<()> {
            self.storage.with_connection(|conn| {
                conn.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
                Ok(())
            })
        }
    }

    // Silence the unused-import warning when chrono::TimeZone isn't otherwise
    // referenced; parse_from_rfc3339 only needs DateTime, kept for parity
    // with the teacher's parsing idiom.
    #[allow(unused_imports)]
    use TimeZone as _;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[tokio::test]
    async fn save_and_find_by_id() {
        let store = InMemoryMessageStore::new();
        let msg = Message::new("s1", Role::User, "hello", None);
        let id = msg.id.clone();
        store.save(msg).await.unwrap();
        let found = store.find_by_id(&id).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn find_by_session_orders_by_timestamp() {
        let store = InMemoryMessageStore::new();
        let m1 = Message::new("s1", Role::User, "first", None);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let m2 = Message::new("s1", Role::Assistant, "second", Some(m1.id.clone()));
        store.save(m1.clone()).await.unwrap();
        store.save(m2.clone()).await.unwrap();
        let found = store.find_by_session_id("s1").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, m1.id);
        assert_eq!(found[1].id, m2.id);
    }

    #[tokio::test]
    async fn delete_by_session_removes_only_that_session() {
        let store = InMemoryMessageStore::new();
        store.save(Message::new("s1", Role::User, "a", None)).await.unwrap();
        store.save(Message::new("s2", Role::User, "b", None)).await.unwrap();
        store.delete_by_session_id("s1").await.unwrap();
        assert!(store.find_by_session_id("s1").await.unwrap().is_empty());
        assert_eq!(store.find_by_session_id("s2").await.unwrap().len(), 1);
    }

    #[test]
    fn last_message_prefers_latest_timestamp() {
        let m1 = Message::new("s1", Role::User, "a", None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let m2 = Message::new("s1", Role::Assistant, "b", Some(m1.id.clone()));
        let messages = vec![m1.clone(), m2.clone()];
        assert_eq!(last_message(&messages).unwrap().id, m2.id);
    }
}
