//! Key-information extractor: LLM-backed structured extraction with a
//! process-wide cache and a lexical fallback.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::generator::{GenerateOptions, Generator};
use crate::types::{ExtractedInformation, Message, Sentiment, Urgency};

static CAPITALIZED_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z][a-zA-Z]{1,}\b").unwrap());

const MAX_CONCURRENT_DEFAULT: usize = 5;

pub struct KeyInformationExtractor {
    generator: Arc<dyn Generator>,
    cache: DashMap<String, ExtractedInformation>,
    concurrency: Arc<tokio::sync::Semaphore>,
}

impl KeyInformationExtractor {
    pub fn new(generator: Arc<dyn Generator>, max_concurrent_requests: usize) -> Self {
        Self {
            generator,
            cache: DashMap::new(),
            concurrency: Arc::new(tokio::sync::Semaphore::new(max_concurrent_requests.max(1))),
        }
    }

    pub fn with_defaults(generator: Arc<dyn Generator>) -> Self {
        Self::new(generator, MAX_CONCURRENT_DEFAULT)
    }

    /// `extract(message, sessionId) -> ExtractedInformation`.
    pub async fn extract(&self, message: &Message, session_id: &str) -> ExtractedInformation {
        if let Some(cached) = self.cache.get(&message.id) {
            return cached.clone();
        }

        let _permit = self.concurrency.acquire().await.ok();
        // Re-check under the permit: a concurrent caller may have populated
        // the cache while we were waiting.
        if let Some(cached) = self.cache.get(&message.id) {
            return cached.clone();
        }

        let info = self.extract_uncached(message, session_id).await;
        self.cache.insert(message.id.clone(), info.clone());
        info
    }

    async fn extract_uncached(&self, message: &Message, session_id: &str) -> ExtractedInformation {
        let prompt = format!(
            "Extract structured information from this message as a strict JSON object \
             with fields entities (array of strings), keyFacts (array of strings), \
             userIntent (string or null), actionItems (array of strings), \
             contextualInfo (string or null), sentiment (positive/negative/neutral), \
             urgency (low/medium/high). Respond with JSON only.\n\nMessage: {}",
            message.content
        );

        match self.generator.generate(&prompt, GenerateOptions::default()).await {
            Ok(raw) => match parse_extraction_json(&raw) {
                Some(info) => info,
                None => {
                    tracing::warn!(session_id, message_id = %message.id, "extraction JSON unparseable, using lexical fallback");
                    lexical_fallback(&message.content)
                }
            },
            Err(e) => {
                tracing::warn!(session_id, message_id = %message.id, error = %e, "extraction generator call failed, using lexical fallback");
                lexical_fallback(&message.content)
            }
        }
    }

    /// Run extractions concurrently bounded by the extractor's concurrency
    /// cap, preserving input order in the result.
    pub async fn extract_batch(&self, messages: &[Message], session_id: &str) -> Vec<ExtractedInformation> {
        let futures: Vec<_> = messages.iter().map(|m| self.extract(m, session_id)).collect();
        futures::future::join_all(futures).await
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}

/// Extract the substring from the first `{` to the last `}` and parse it;
/// never attempt to repair malformed JSON.
fn parse_extraction_json(raw: &str) -> Option<ExtractedInformation> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let candidate = &raw[start..=end];
    let value: serde_json::Value = serde_json::from_str(candidate).ok()?;

    let entities = string_array(&value, "entities");
    let key_facts = string_array(&value, "keyFacts");
    let action_items = string_array(&value, "actionItems");
    let user_intent = non_empty_string(&value, "userIntent");
    let contextual_info = non_empty_string(&value, "contextualInfo");
    let sentiment = value["sentiment"].as_str().and_then(|s| s.parse().ok()).unwrap_or_default();
    let urgency = value["urgency"].as_str().and_then(|s| s.parse().ok()).unwrap_or_default();

    Some(ExtractedInformation {
        entities,
        key_facts,
        action_items,
        user_intent,
        contextual_info,
        sentiment,
        urgency,
    })
}

fn string_array(value: &serde_json::Value, field: &str) -> Vec<String> {
    value[field]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty_string(value: &serde_json::Value, field: &str) -> Option<String> {
    value[field].as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Capitalized tokens become entities, the message (truncated) becomes a
/// single key fact, sentiment=neutral, urgency=medium.
fn lexical_fallback(content: &str) -> ExtractedInformation {
    let mut seen = std::collections::HashSet::new();
    let entities: Vec<String> = CAPITALIZED_TOKEN
        .find_iter(content)
        .map(|m| m.as_str().to_string())
        .filter(|s| seen.insert(s.clone()))
        .collect();

    let truncated: String = content.chars().take(200).collect();

    ExtractedInformation {
        entities,
        key_facts: vec![truncated],
        action_items: Vec::new(),
        user_intent: None,
        contextual_info: None,
        sentiment: Sentiment::Neutral,
        urgency: Urgency::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::NullGenerator;
    use crate::types::Role;

    #[tokio::test]
    async fn falls_back_to_lexical_on_generator_failure() {
        let extractor = KeyInformationExtractor::with_defaults(Arc::new(NullGenerator));
        let msg = Message::new("s1", Role::User, "Talk to Alice about Project Atlas tomorrow", None);
        let info = extractor.extract(&msg, "s1").await;
        assert!(info.entities.contains(&"Alice".to_string()));
        assert!(info.entities.contains(&"Project".to_string()) || info.entities.contains(&"Atlas".to_string()));
        assert_eq!(info.sentiment, Sentiment::Neutral);
        assert_eq!(info.urgency, Urgency::Medium);
    }

    #[tokio::test]
    async fn extraction_is_cached_by_message_id() {
        let extractor = KeyInformationExtractor::with_defaults(Arc::new(NullGenerator));
        let msg = Message::new("s1", Role::User, "Hello World", None);
        extractor.extract(&msg, "s1").await;
        assert_eq!(extractor.cache_size(), 1);
        extractor.extract(&msg, "s1").await;
        assert_eq!(extractor.cache_size(), 1);
    }

    #[test]
    fn json_parsing_tolerates_surrounding_prose() {
        let raw = r#"Sure, here you go: {"entities": ["Bob"], "keyFacts": ["met at noon"], "userIntent": "schedule", "actionItems": [], "contextualInfo": null, "sentiment": "positive", "urgency": "low"} Hope that helps!"#;
        let info = parse_extraction_json(raw).unwrap();
        assert_eq!(info.entities, vec!["Bob".to_string()]);
        assert_eq!(info.sentiment, Sentiment::Positive);
        assert_eq!(info.urgency, Urgency::Low);
    }

    #[test]
    fn malformed_json_returns_none_without_repair_attempt() {
        let raw = "{not valid json";
        assert!(parse_extraction_json(raw).is_none());
    }

    #[test]
    fn lexical_fallback_never_panics_on_odd_input() {
        for input in ["", "   ", "\u{0}\u{1}", "ALLCAPS words here", "💯 emoji only"] {
            let _ = lexical_fallback(input);
        }
    }
}
