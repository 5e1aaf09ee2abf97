//! LLM-backed conversation summarization, initial and incremental.

use std::sync::Arc;

use crate::generator::{GenerateOptions, Generator};
use crate::types::Message;

const SUMMARIZATION_TEMPERATURE: f32 = 0.3;

pub struct SummaryService {
    generator: Arc<dyn Generator>,
    max_input_length: usize,
}

impl SummaryService {
    pub fn new(generator: Arc<dyn Generator>, max_input_length: usize) -> Self {
        Self {
            generator,
            max_input_length,
        }
    }

    /// Format messages as "[HH:mm:ss] role: content\n\n" per message,
    /// truncating from the front (preferring a message boundary within
    /// ±200 chars of the cut) if the formatted transcript exceeds the input
    /// budget.
    fn format_transcript(&self, messages: &[Message]) -> String {
        let full: String = messages
            .iter()
            .map(|m| format!("[{}] {}: {}\n\n", m.timestamp.format("%H:%M:%S"), m.role, m.content))
            .collect();

        if full.len() <= self.max_input_length {
            return full;
        }

        let cut_from = full.len() - self.max_input_length;
        let window_start = cut_from.saturating_sub(200);
        let window_end = (cut_from + 200).min(full.len());

        let boundary = full[window_start..window_end]
            .find("\n\n")
            .map(|p| window_start + p + 2);

        let start = boundary.unwrap_or(cut_from);
        let start = ceil_char_boundary(&full, start);
        format!("... [earlier conversation truncated]\n\n{}", &full[start..])
    }

    /// `generateSummary(messages, sessionId) -> text | null`.
    pub async fn generate_summary(&self, messages: &[Message], session_id: &str) -> crate::error::Result<Option<String>> {
        if messages.is_empty() {
            return Ok(None);
        }

        let transcript = self.format_transcript(messages);
        let prompt = format!(
            "Summarize the following conversation. Capture: the topics discussed, \
             information shared, decisions made, questions and their answers, and \
             any concrete facts mentioned.\n\n{transcript}"
        );

        match self
            .generator
            .generate(&prompt, GenerateOptions { temperature: SUMMARIZATION_TEMPERATURE })
            .await
        {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "summary generation failed, using deterministic fallback");
                Ok(Some(fallback_summary(messages)))
            }
        }
    }

    /// `updateSummary(existing, newMessages, sessionId)`.
    pub async fn update_summary(
        &self,
        existing: &str,
        new_messages: &[Message],
        session_id: &str,
    ) -> crate::error::Result<Option<String>> {
        if existing.trim().is_empty() {
            return self.generate_summary(new_messages, session_id).await;
        }

        let transcript = self.format_transcript(new_messages);
        let combined_len = existing.len() + transcript.len();

        let prompt = if combined_len > self.max_input_length {
            // Regenerate over the new messages alone when the combined input
            // would exceed the budget.
            format!(
                "Summarize the following conversation. Capture: the topics discussed, \
                 information shared, decisions made, questions and their answers, and \
                 any concrete facts mentioned.\n\n{transcript}"
            )
        } else {
            format!(
                "Here is the existing summary of a conversation:\n\n{existing}\n\n\
                 Here are new messages since that summary:\n\n{transcript}\n\n\
                 Produce an updated summary that incorporates the new information \
                 while retaining everything still relevant from the existing summary."
            )
        };

        match self
            .generator
            .generate(&prompt, GenerateOptions { temperature: SUMMARIZATION_TEMPERATURE })
            .await
        {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "summary update failed, keeping existing summary");
                Ok(Some(existing.to_string()))
            }
        }
    }
}

/// Deterministic fallback: message count by role plus the last three
/// messages truncated to 100 chars each.
fn fallback_summary(messages: &[Message]) -> String {
    let user_count = messages.iter().filter(|m| matches!(m.role, crate::types::Role::User)).count();
    let assistant_count = messages.len() - user_count;

    let recent: Vec<String> = messages
        .iter()
        .rev()
        .take(3)
        .map(|m| {
            let truncated: String = m.content.chars().take(100).collect();
            format!("{}: {}", m.role, truncated)
        })
        .collect();
    let recent: Vec<String> = recent.into_iter().rev().collect();

    format!(
        "{user_count} user message(s), {assistant_count} assistant message(s). Recent: {}",
        recent.join(" | ")
    )
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
    use crate::generator::NullGenerator;
    use crate::types::Role;

    fn messages(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::new("s1", Role::User, format!("message {i}"), None))
            .collect()
    }

    #[tokio::test]
    async fn falls_back_when_generator_fails() {
        let service = SummaryService::new(Arc::new(NullGenerator), 4000);
        let summary = service.generate_summary(&messages(5), "s1").await.unwrap();
        assert!(summary.is_some());
        assert!(summary.unwrap().contains("user message"));
    }

    #[tokio::test]
    async fn empty_messages_yield_no_summary() {
        let service = SummaryService::new(Arc::new(NullGenerator), 4000);
        assert!(service.generate_summary(&[], "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_keeps_existing_summary_on_failure() {
        let service = SummaryService::new(Arc::new(NullGenerator), 4000);
        let result = service
            .update_summary("prior summary text", &messages(2), "s1")
            .await
            .unwrap();
        assert_eq!(result, Some("prior summary text".to_string()));
    }

    #[tokio::test]
    async fn update_delegates_to_generate_when_no_prior() {
        let service = SummaryService::new(Arc::new(NullGenerator), 4000);
        let result = service.update_summary("", &messages(3), "s1").await.unwrap();
        assert!(result.is_some());
    }
}
