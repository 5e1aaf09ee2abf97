//! Core data model: Message, ChunkEmbedding, ConversationWindow,
//! ExtractedInformation, ExpandedChunkGroup.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Assistant => write!(f, "Assistant"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ASSISTANT" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One turn in a conversation. Never mutated after creation; deleted only by
/// administrative clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub parent_message_id: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl Message {
    pub fn new(
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        parent_message_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            parent_message_id,
            metadata: HashMap::new(),
        }
    }
}

/// A chunk of a message's content plus its embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEmbedding {
    pub id: i64,
    pub message_id: String,
    pub session_id: String,
    pub chunk_index: usize,
    pub chunk_text: String,
    pub embedding_vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl ChunkEmbedding {
    /// A record is unusable once its embedding is empty or of the wrong
    /// dimension; callers check this rather than the vector length directly
    /// so the definition of "usable" lives in one place.
    pub fn is_usable(&self, expected_dimension: usize) -> bool {
        !self.embedding_vector.is_empty() && self.embedding_vector.len() == expected_dimension
    }
}

/// Rolling in-memory window of recent messages for one session.
#[derive(Debug, Clone, Default)]
pub struct ConversationWindow {
    pub messages: Vec<Message>,
    pub summary: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// A snapshot of a session's conversation context, handed to the prompt
/// builder and returned from the window manager.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    pub recent_messages: Vec<Message>,
    pub summary: Option<String>,
}

/// Coarse sentiment classification produced by the key-information extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Default for Sentiment {
    fn default() -> Self {
        Sentiment::Neutral
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            _ => Ok(Sentiment::Neutral),
        }
    }
}

/// Urgency classification produced by the key-information extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Default for Urgency {
    fn default() -> Self {
        Urgency::Medium
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Urgency::Low),
            "high" => Ok(Urgency::High),
            _ => Ok(Urgency::Medium),
        }
    }
}

/// Structured facts extracted from a single message, cached process-wide.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedInformation {
    pub entities: Vec<String>,
    pub key_facts: Vec<String>,
    pub action_items: Vec<String>,
    pub user_intent: Option<String>,
    pub contextual_info: Option<String>,
    pub sentiment: Sentiment,
    pub urgency: Urgency,
}

impl ExtractedInformation {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.key_facts.is_empty()
            && self.action_items.is_empty()
            && self.user_intent.is_none()
            && self.contextual_info.is_none()
    }
}

/// A retrieval hit plus its neighboring chunks from the same source message,
/// sorted by chunk index.
#[derive(Debug, Clone)]
pub struct ExpandedChunkGroup {
    pub message_id: String,
    pub role: Role,
    pub chunks: Vec<ChunkEmbedding>,
}

impl ExpandedChunkGroup {
    /// Earliest chunk's createdAt, used as the group's timestamp for
    /// merge/sort purposes.
    pub fn earliest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.chunks.iter().map(|c| c.created_at).min()
    }

    /// All chunk text concatenated in chunk-index order, space-joined.
    pub fn combined_text(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.chunk_text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Retrieval strategy for the context retriever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStrategy {
    Fixed,
    Adaptive,
    Intelligent,
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetrievalStrategy::Fixed => "fixed",
            RetrievalStrategy::Adaptive => "adaptive",
            RetrievalStrategy::Intelligent => "intelligent",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RetrievalStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(RetrievalStrategy::Fixed),
            "adaptive" => Ok(RetrievalStrategy::Adaptive),
            "intelligent" => Ok(RetrievalStrategy::Intelligent),
            other => Err(format!("unknown retrieval strategy: {other}")),
        }
    }
}

/// Result of validating a session's message chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainValidation {
    pub session_id: String,
    pub valid: bool,
    pub total_messages: usize,
    pub root_count: usize,
    pub broken_refs: Vec<String>,
    pub orphans: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_roundtrips() {
        assert_eq!(Role::from_str("user").unwrap(), Role::User);
        assert_eq!(Role::User.to_string(), "User");
    }

    #[test]
    fn chunk_usability() {
        let c = ChunkEmbedding {
            id: 1,
            message_id: "m1".into(),
            session_id: "s1".into(),
            chunk_index: 0,
            chunk_text: "hello".into(),
            embedding_vector: vec![0.1, 0.2],
            created_at: Utc::now(),
        };
        assert!(c.is_usable(2));
        assert!(!c.is_usable(3));
    }
}
