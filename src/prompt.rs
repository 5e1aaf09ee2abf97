//! Prompt builder: assembles the system/context/window/question prompt sent
//! to the generator, enforcing a hard character budget.

use crate::types::{ConversationContext, ExpandedChunkGroup, ExtractedInformation};

const SECTION_SEPARATOR: &str = "\n\n";
const SYSTEM_PREAMBLE: &str = "You are a helpful assistant with access to the user's conversation history.";
const RESERVED_BUDGET: usize = 500;
const TRUNCATION_MARKER: &str = "\n\n[... truncated ...]";

const CONVERSATION_WEIGHT: f64 = 0.4;
const KEY_INFO_WEIGHT: f64 = 0.3;
const HISTORICAL_WEIGHT: f64 = 0.2;

pub struct PromptBuilder {
    max_length: usize,
    enable_truncation: bool,
}

impl PromptBuilder {
    pub fn new(max_length: usize, enable_truncation: bool) -> Self {
        Self { max_length, enable_truncation }
    }

    /// Assembles, in order: a fixed system preamble, the recent-conversation
    /// section (summary + recent messages), the key-information section,
    /// the retrieved-historical-context section, and the current message.
    /// When the assembly exceeds the budget, the three context sections are
    /// weighted (conversation 0.4, key info 0.3, historical 0.2) and
    /// truncated at natural breaks, highest weight first; the current
    /// message is always included verbatim.
    pub fn build(
        &self,
        user_message: &str,
        context: &ConversationContext,
        key_info: &ExtractedInformation,
        retrieved: &[ExpandedChunkGroup],
    ) -> String {
        let current_block = format!("## Current Message:\n{user_message}");

        let conversation_block = build_conversation_block(context);
        let key_info_block = build_key_info_block(key_info);
        let historical_block = build_historical_block(retrieved);

        let mut full_sections = vec![SYSTEM_PREAMBLE.to_string()];
        full_sections.extend(conversation_block.clone());
        full_sections.extend(key_info_block.clone());
        full_sections.extend(historical_block.clone());
        full_sections.push(current_block.clone());

        let assembled = full_sections.join(SECTION_SEPARATOR);

        if !self.enable_truncation || assembled.len() <= self.max_length {
            return assembled;
        }

        self.truncate_to_budget(&current_block, conversation_block, key_info_block, historical_block)
    }

    fn truncate_to_budget(
        &self,
        current_block: &str,
        conversation_block: Option<String>,
        key_info_block: Option<String>,
        historical_block: Option<String>,
    ) -> String {
        let available = self
            .max_length
            .saturating_sub(SYSTEM_PREAMBLE.len())
            .saturating_sub(current_block.len())
            .saturating_sub(RESERVED_BUDGET);

        // Weight-sorted (descending), each carrying its canonical display slot.
        let mut candidates: Vec<(f64, usize, String)> = Vec::new();
        if let Some(c) = conversation_block {
            candidates.push((CONVERSATION_WEIGHT, 0, c));
        }
        if let Some(k) = key_info_block {
            candidates.push((KEY_INFO_WEIGHT, 1, k));
        }
        if let Some(h) = historical_block {
            candidates.push((HISTORICAL_WEIGHT, 2, h));
        }
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut included: Vec<(usize, String)> = Vec::new();
        let mut stop = false;

        for (weight, slot, content) in candidates {
            if stop {
                break;
            }
            let budget = ((available as f64) * weight).floor() as usize;
            if content.len() <= budget {
                included.push((slot, content));
            } else {
                included.push((slot, natural_break_truncate(&content, budget)));
                stop = true;
            }
        }

        included.sort_by_key(|(slot, _)| *slot);

        let mut sections = vec![SYSTEM_PREAMBLE.to_string()];
        sections.extend(included.into_iter().map(|(_, content)| content));
        sections.push(current_block.to_string());

        let assembled = sections.join(SECTION_SEPARATOR);

        if assembled.len() <= self.max_length {
            return assembled;
        }

        // Final pass: keep system and current message intact, truncate the
        // middle context block as a whole to make it fit.
        let middle_budget = self
            .max_length
            .saturating_sub(SYSTEM_PREAMBLE.len())
            .saturating_sub(current_block.len())
            .saturating_sub(SECTION_SEPARATOR.len() * 2);

        let middle = sections[1..sections.len() - 1].join(SECTION_SEPARATOR);
        let middle_truncated = natural_break_truncate(&middle, middle_budget);

        [SYSTEM_PREAMBLE.to_string(), middle_truncated, current_block.to_string()].join(SECTION_SEPARATOR)
    }
}

fn build_conversation_block(context: &ConversationContext) -> Option<String> {
    if context.summary.is_none() && context.recent_messages.is_empty() {
        return None;
    }

    let mut block = String::from("## Recent Conversation:\n");

    if let Some(summary) = &context.summary {
        block.push_str(&format!("**Summary:** {summary}\n\n"));
    }

    if !context.recent_messages.is_empty() {
        block.push_str("**Recent Messages:**\n");
        for m in &context.recent_messages {
            block.push_str(&format!("- {}: {}\n", m.role, m.content));
        }
    }

    Some(block.trim_end().to_string())
}

fn build_key_info_block(info: &ExtractedInformation) -> Option<String> {
    if info.is_empty() {
        return None;
    }

    let mut subsections = Vec::new();

    if !info.entities.is_empty() {
        subsections.push(format!("**Important Entities:** {}", info.entities.join(", ")));
    }
    if !info.key_facts.is_empty() {
        let facts: String = info.key_facts.iter().map(|f| format!("- {f}")).collect::<Vec<_>>().join("\n");
        subsections.push(format!("**Key Facts:**\n{facts}"));
    }
    if let Some(intent) = &info.user_intent {
        subsections.push(format!("**User Intent:** {intent}"));
    }
    if !info.action_items.is_empty() {
        let items: String = info.action_items.iter().map(|a| format!("- {a}")).collect::<Vec<_>>().join("\n");
        subsections.push(format!("**Action Items:**\n{items}"));
    }
    if let Some(ctx) = &info.contextual_info {
        subsections.push(format!("**Context:** {ctx}"));
    }

    if subsections.is_empty() {
        return None;
    }

    Some(format!("## Key Information:\n{}", subsections.join("\n\n")))
}

fn build_historical_block(retrieved: &[ExpandedChunkGroup]) -> Option<String> {
    if retrieved.is_empty() {
        return None;
    }

    let mut block = String::from("## Relevant Historical Context:\n");
    let groups: Vec<String> = retrieved
        .iter()
        .map(|g| format!("**Context from previous conversation:**\n\"{}\"", g.combined_text()))
        .collect();
    block.push_str(&groups.join("\n\n"));

    Some(block)
}

/// Cut `text` at the nearest natural break at or before `target_len`: a
/// paragraph break within 200 chars, else a sentence terminator within 100
/// chars, else whitespace within 50 chars, else a hard cut; append the
/// truncation marker.
fn natural_break_truncate(text: &str, target_len: usize) -> String {
    let cut = natural_break_point(text, target_len);
    let mut out = text[..cut].to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

fn natural_break_point(text: &str, target_len: usize) -> usize {
    let target = ceil_char_boundary(text, target_len.min(text.len()));

    if let Some(cut) = find_substring_break_before(text, target, "\n\n", 200) {
        return cut;
    }
    if let Some(cut) = find_char_break_before(text, target, &['.', '!', '?'], 100) {
        return cut;
    }
    if let Some(cut) = find_char_break_before(text, target, &[' ', '\t', '\n'], 50) {
        return cut;
    }
    floor_char_boundary(text, target)
}

fn find_substring_break_before(text: &str, target: usize, pat: &str, window: usize) -> Option<usize> {
    let start = floor_char_boundary(text, target.saturating_sub(window));
    let end = ceil_char_boundary(text, target);
    if start >= end {
        return None;
    }
    text[start..end].rfind(pat).map(|p| start + p + pat.len())
}

fn find_char_break_before(text: &str, target: usize, chars: &[char], window: usize) -> Option<usize> {
    let start = floor_char_boundary(text, target.saturating_sub(window));
    let end = ceil_char_boundary(text, target);
    if start >= end {
        return None;
    }
    text[start..end].rfind(chars).map(|p| ceil_char_boundary(text, start + p + 1))
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    let len = text.len();
    while idx < len && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx.min(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkEmbedding, ConversationContext, Message, Role, Sentiment, Urgency};

    fn ctx_with_messages(n: usize) -> ConversationContext {
        ConversationContext {
            recent_messages: (0..n).map(|i| Message::new("s1", Role::User, format!("message {i}"), None)).collect(),
            summary: Some("earlier summary text".to_string()),
        }
    }

    fn group(message_id: &str, text: &str) -> ExpandedChunkGroup {
        ExpandedChunkGroup {
            message_id: message_id.to_string(),
            role: Role::User,
            chunks: vec![ChunkEmbedding {
                id: 0,
                message_id: message_id.to_string(),
                session_id: "s1".into(),
                chunk_index: 0,
                chunk_text: text.to_string(),
                embedding_vector: vec![],
                created_at: chrono::Utc::now(),
            }],
        }
    }

    fn key_info() -> ExtractedInformation {
        ExtractedInformation {
            entities: vec!["Alice".to_string()],
            key_facts: vec!["met at noon".to_string()],
            action_items: vec!["follow up tomorrow".to_string()],
            user_intent: Some("schedule a meeting".to_string()),
            contextual_info: Some("discussing Q3 plans".to_string()),
            sentiment: Sentiment::Neutral,
            urgency: Urgency::Medium,
        }
    }

    #[test]
    fn builds_all_sections_when_under_budget() {
        let builder = PromptBuilder::new(4000, true);
        let prompt = builder.build("what did I say?", &ctx_with_messages(2), &key_info(), &[group("m1", "earlier relevant text")]);
        assert!(prompt.contains("## Relevant Historical Context:"));
        assert!(prompt.contains("## Recent Conversation:"));
        assert!(prompt.contains("**Summary:**"));
        assert!(prompt.contains("## Key Information:"));
        assert!(prompt.contains("**Important Entities:** Alice"));
        assert!(prompt.contains("## Current Message:"));
        assert!(prompt.contains("what did I say?"));
    }

    #[test]
    fn recent_messages_render_as_dash_lines() {
        let builder = PromptBuilder::new(4000, true);
        let context = ConversationContext {
            recent_messages: vec![
                Message::new("s1", Role::User, "hello", None),
                Message::new("s1", Role::Assistant, "hi there", None),
            ],
            summary: None,
        };
        let prompt = builder.build("hello", &context, &ExtractedInformation::default(), &[]);
        assert!(prompt.contains("- User: hello"));
        assert!(prompt.contains("- Assistant: hi there"));
    }

    #[test]
    fn empty_key_info_omits_section_and_subsections() {
        let builder = PromptBuilder::new(4000, true);
        let prompt = builder.build("hi", &ConversationContext::default(), &ExtractedInformation::default(), &[]);
        assert!(!prompt.contains("## Key Information:"));
    }

    #[test]
    fn key_info_omits_empty_subsections() {
        let builder = PromptBuilder::new(4000, true);
        let info = ExtractedInformation {
            entities: vec!["Bob".to_string()],
            ..Default::default()
        };
        let prompt = builder.build("hi", &ConversationContext::default(), &info, &[]);
        assert!(prompt.contains("**Important Entities:** Bob"));
        assert!(!prompt.contains("**Key Facts:**"));
        assert!(!prompt.contains("**User Intent:**"));
        assert!(!prompt.contains("**Action Items:**"));
        assert!(!prompt.contains("**Context:**"));
    }

    #[test]
    fn never_exceeds_budget_when_truncation_enabled() {
        let builder = PromptBuilder::new(200, true);
        let big_text = "x".repeat(2000);
        let prompt = builder.build("question", &ctx_with_messages(20), &key_info(), &[group("m1", &big_text)]);
        assert!(prompt.len() <= 200);
    }

    #[test]
    fn truncation_inserts_a_marker() {
        let builder = PromptBuilder::new(300, true);
        let big_text = "word ".repeat(500);
        let prompt = builder.build("question", &ctx_with_messages(20), &key_info(), &[group("m1", &big_text)]);
        assert!(prompt.contains("truncated"));
    }

    #[test]
    fn skips_truncation_when_disabled() {
        let builder = PromptBuilder::new(10, false);
        let prompt = builder.build(
            "a longer question than ten chars",
            &ConversationContext::default(),
            &ExtractedInformation::default(),
            &[],
        );
        assert!(prompt.len() > 10);
    }

    #[test]
    fn empty_context_still_includes_question() {
        let builder = PromptBuilder::new(4000, true);
        let prompt = builder.build("hello", &ConversationContext::default(), &ExtractedInformation::default(), &[]);
        assert!(prompt.contains("hello"));
        assert!(!prompt.contains("## Relevant Historical Context:"));
    }
}
