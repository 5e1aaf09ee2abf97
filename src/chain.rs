//! Chain validator and reconstructor: detects/repairs broken, orphan, and
//! multi-root message chains and rebuilds a session's conversation order.

use std::collections::{HashMap, HashSet};

use crate::storage::MessageStore;
use crate::types::{ChainValidation, Message};

pub struct ChainValidator<'a> {
    store: &'a dyn MessageStore,
}

#[derive(Debug, Clone)]
pub struct Repair {
    pub message_id: String,
    pub old_parent: Option<String>,
    pub new_parent: Option<String>,
}

#[derive(Debug)]
pub struct RepairResult {
    pub repairs: Vec<Repair>,
    pub before: ChainValidation,
    pub after: ChainValidation,
}

impl<'a> ChainValidator<'a> {
    pub fn new(store: &'a dyn MessageStore) -> Self {
        Self { store }
    }

    pub async fn validate(&self, session_id: &str) -> crate::error::Result<ChainValidation> {
        let messages = self.store.find_by_session_id(session_id).await?;
        Ok(validate_messages(session_id, &messages))
    }

    pub async fn repair(&self, session_id: &str) -> crate::error::Result<RepairResult> {
        let mut messages = self.store.find_by_session_id(session_id).await?;
        let before = validate_messages(session_id, &messages);

        if before.valid {
            return Ok(RepairResult {
                repairs: Vec::new(),
                after: before.clone(),
                before,
            });
        }

        let broken: HashSet<String> = before.broken_refs.iter().cloned().collect();
        let mut repairs = Vec::new();

        // Sort candidates by timestamp so "most recent message with
        // timestamp <= its own" can be found by scanning in order.
        let mut by_time = messages.clone();
        by_time.sort_by_key(|m| m.timestamp);

        for msg in messages.iter_mut() {
            if !broken.contains(&msg.id) {
                continue;
            }
            let new_parent = by_time
                .iter()
                .filter(|m| m.id != msg.id && m.timestamp <= msg.timestamp)
                .max_by_key(|m| m.timestamp)
                .map(|m| m.id.clone());

            repairs.push(Repair {
                message_id: msg.id.clone(),
                old_parent: msg.parent_message_id.clone(),
                new_parent: new_parent.clone(),
            });
            msg.parent_message_id = new_parent;
        }

        for msg in messages.iter() {
            if broken.contains(&msg.id) {
                self.store.save(msg.clone()).await.ok();
            }
        }

        let after = validate_messages(session_id, &messages);

        Ok(RepairResult { repairs, before, after })
    }

    /// Validate; attempt repair on broken references; reconstruct via DFS
    /// from the oldest root, falling back to a plain descending-timestamp
    /// sort on unexpected failure.
    pub async fn reconstruct(&self, session_id: &str) -> crate::error::Result<Vec<Message>> {
        let mut messages = self.store.find_by_session_id(session_id).await?;
        let validation = validate_messages(session_id, &messages);

        if !validation.broken_refs.is_empty() {
            if let Ok(result) = self.repair(session_id).await {
                tracing::warn!(
                    session_id,
                    repairs = result.repairs.len(),
                    "repaired broken chain references before reconstruction"
                );
            }
            messages = self.store.find_by_session_id(session_id).await.unwrap_or(messages);
        }

        match try_reconstruct(&messages) {
            Some(ordered) => Ok(ordered),
            None => {
                let mut fallback = messages;
                fallback.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                Ok(fallback)
            }
        }
    }
}

fn validate_messages(session_id: &str, messages: &[Message]) -> ChainValidation {
    let index: HashMap<&str, &Message> = messages.iter().map(|m| (m.id.as_str(), m)).collect();

    let broken_refs: Vec<String> = messages
        .iter()
        .filter(|m| matches!(&m.parent_message_id, Some(p) if !index.contains_key(p.as_str())))
        .map(|m| m.id.clone())
        .collect();
    let broken_set: HashSet<&str> = broken_refs.iter().map(|s| s.as_str()).collect();

    let roots: Vec<&Message> = messages.iter().filter(|m| m.parent_message_id.is_none()).collect();

    // Reachability from each root via children-by-parent adjacency.
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for m in messages {
        if let Some(p) = &m.parent_message_id {
            if index.contains_key(p.as_str()) {
                children.entry(p.as_str()).or_default().push(m.id.as_str());
            }
        }
    }

    let mut reachable: HashSet<&str> = HashSet::new();
    for root in &roots {
        let mut stack = vec![root.id.as_str()];
        while let Some(id) = stack.pop() {
            if reachable.insert(id) {
                if let Some(kids) = children.get(id) {
                    stack.extend(kids.iter());
                }
            }
        }
    }

    let orphans: Vec<String> = messages
        .iter()
        .filter(|m| !reachable.contains(m.id.as_str()) && !broken_set.contains(m.id.as_str()))
        .map(|m| m.id.clone())
        .collect();

    let valid = broken_refs.is_empty() && orphans.is_empty() && roots.len() == 1;

    ChainValidation {
        session_id: session_id.to_string(),
        valid,
        total_messages: messages.len(),
        root_count: roots.len(),
        broken_refs,
        orphans,
    }
}

fn try_reconstruct(messages: &[Message]) -> Option<Vec<Message>> {
    if messages.is_empty() {
        return Some(Vec::new());
    }

    let by_id: HashMap<&str, &Message> = messages.iter().map(|m| (m.id.as_str(), m)).collect();
    let mut roots: Vec<&Message> = messages.iter().filter(|m| m.parent_message_id.is_none()).collect();
    roots.sort_by_key(|m| m.timestamp);
    let primary_root = roots.first()?;

    let mut children: HashMap<&str, Vec<&Message>> = HashMap::new();
    for m in messages {
        if let Some(p) = &m.parent_message_id {
            if by_id.contains_key(p.as_str()) {
                children.entry(p.as_str()).or_default().push(m);
            }
        }
    }
    for kids in children.values_mut() {
        kids.sort_by_key(|m| m.timestamp);
    }

    let mut ordered = Vec::with_capacity(messages.len());
    let mut visited = HashSet::new();
    let mut stack = vec![*primary_root];
    while let Some(node) = stack.pop() {
        if !visited.insert(node.id.clone()) {
            continue;
        }
        ordered.push(node.clone());
        if let Some(kids) = children.get(node.id.as_str()) {
            // push in reverse so ascending-timestamp order pops first
            for kid in kids.iter().rev() {
                stack.push(kid);
            }
        }
    }

    for m in messages {
        if !visited.contains(&m.id) {
            tracing::warn!(message_id = %m.id, "appending unreached message after reconstruction");
            ordered.push(m.clone());
            visited.insert(m.id.clone());
        }
    }

    Some(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryMessageStore;
    use crate::types::Role;
    use chrono::{Duration, Utc};

    fn msg_at(session: &str, id: &str, parent: Option<&str>, offset_secs: i64) -> Message {
        Message {
            id: id.to_string(),
            session_id: session.to_string(),
            role: Role::User,
            content: format!("content {id}"),
            timestamp: Utc::now() + Duration::seconds(offset_secs),
            parent_message_id: parent.map(|s| s.to_string()),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn detects_broken_refs_and_multi_root() {
        let store = InMemoryMessageStore::new();
        store.save(msg_at("s1", "m1", None, 0)).await.unwrap();
        store.save(msg_at("s1", "m2", Some("m1"), 1)).await.unwrap();
        store.save(msg_at("s1", "m3", Some("nonexistent"), 2)).await.unwrap();
        store.save(msg_at("s1", "m4", None, 3)).await.unwrap();

        let validator = ChainValidator::new(&store);
        let validation = validator.validate("s1").await.unwrap();

        assert!(!validation.valid);
        assert_eq!(validation.broken_refs, vec!["m3".to_string()]);
        assert_eq!(validation.root_count, 2);
    }

    #[tokio::test]
    async fn repair_reassigns_broken_parent_to_latest_eligible() {
        let store = InMemoryMessageStore::new();
        store.save(msg_at("s1", "m1", None, 0)).await.unwrap();
        store.save(msg_at("s1", "m2", Some("m1"), 1)).await.unwrap();
        store.save(msg_at("s1", "m3", Some("nonexistent"), 2)).await.unwrap();
        store.save(msg_at("s1", "m4", None, 3)).await.unwrap();

        let validator = ChainValidator::new(&store);
        let result = validator.repair("s1").await.unwrap();

        assert_eq!(result.repairs.len(), 1);
        assert_eq!(result.repairs[0].new_parent, Some("m2".to_string()));
        // two roots remain — repair does not touch multi-root
        assert_eq!(result.after.root_count, 2);
    }

    #[tokio::test]
    async fn reconstruct_orders_by_dfs_and_appends_unreached() {
        let store = InMemoryMessageStore::new();
        store.save(msg_at("s1", "m1", None, 0)).await.unwrap();
        store.save(msg_at("s1", "m2", Some("m1"), 1)).await.unwrap();
        store.save(msg_at("s1", "m3", Some("nonexistent"), 2)).await.unwrap();
        store.save(msg_at("s1", "m4", None, 3)).await.unwrap();

        let validator = ChainValidator::new(&store);
        let ordered = validator.reconstruct("s1").await.unwrap();

        let ids: Vec<&str> = ordered.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids[0], "m1");
        assert!(ids.contains(&"m4"));
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn repair_is_idempotent() {
        let store = InMemoryMessageStore::new();
        store.save(msg_at("s1", "m1", None, 0)).await.unwrap();
        store.save(msg_at("s1", "m2", Some("nonexistent"), 1)).await.unwrap();

        let validator = ChainValidator::new(&store);
        validator.repair("s1").await.unwrap();
        let second = validator.repair("s1").await.unwrap();
        assert!(second.repairs.is_empty());
    }
}
