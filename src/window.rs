//! Conversation window manager: rolling buffer per session, summarized on
//! overflow, evicted by idle horizon.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::Result;
use crate::summary::SummaryService;
use crate::types::{ConversationContext, ConversationWindow, Message};

pub struct WindowManager {
    windows: Mutex<HashMap<String, Arc<Mutex<ConversationWindow>>>>,
    summary_service: Arc<SummaryService>,
    max_window_size: usize,
    retention_hours: i64,
}

impl WindowManager {
    pub fn new(summary_service: Arc<SummaryService>, max_window_size: usize, retention_hours: i64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            summary_service,
            max_window_size,
            retention_hours,
        }
    }

    fn window_for(&self, session_id: &str) -> Arc<Mutex<ConversationWindow>> {
        self.windows
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationWindow::default())))
            .clone()
    }

    /// Appends `message`, updates `lastActivity`; if the window now exceeds
    /// `maxWindowSize` it is summarized and trimmed to
    /// `max(3, maxWindowSize/2)` most recent messages.
    pub async fn add_message(&self, session_id: &str, message: Message) -> Result<()> {
        let window = self.window_for(session_id);

        let overflowed_messages = {
            let mut w = window.lock();
            w.messages.push(message);
            w.last_activity = Some(Utc::now());
            if w.messages.len() > self.max_window_size {
                Some(w.messages.clone())
            } else {
                None
            }
        };

        if let Some(messages) = overflowed_messages {
            self.summarize_and_trim(session_id, &window, messages).await;
        }

        Ok(())
    }

    async fn summarize_and_trim(&self, session_id: &str, window: &Arc<Mutex<ConversationWindow>>, messages: Vec<Message>) {
        let existing_summary = window.lock().summary.clone();

        let new_summary = match &existing_summary {
            None => self.summary_service.generate_summary(&messages, session_id).await,
            Some(prior) => {
                self.summary_service
                    .update_summary(prior, &messages, session_id)
                    .await
            }
        };

        let keep = std::cmp::max(3, self.max_window_size / 2);
        let mut w = window.lock();
        match new_summary {
            Ok(Some(summary)) => w.summary = Some(summary),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(session_id, error = %e, "summarization failed, trimming window without updating summary");
            }
        }
        let len = w.messages.len();
        if len > keep {
            w.messages.drain(0..len - keep);
        }
    }

    pub fn get_conversation_context(&self, session_id: &str) -> ConversationContext {
        let window = self.window_for(session_id);
        let w = window.lock();
        ConversationContext {
            recent_messages: w.messages.clone(),
            summary: w.summary.clone(),
        }
    }

    /// Ids of messages currently held in a session's recent-window list,
    /// used by the retriever to build its exclusion set.
    pub fn recent_message_ids(&self, session_id: &str) -> Vec<String> {
        let window = self.window_for(session_id);
        window.lock().messages.iter().map(|m| m.id.clone()).collect()
    }

    pub fn clear_history(&self, session_id: &str) {
        self.windows.lock().remove(session_id);
    }

    pub fn clear_all(&self) {
        self.windows.lock().clear();
    }

    /// Drop windows whose `lastActivity` predates the retention horizon.
    pub fn evict_stale(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(self.retention_hours);
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| {
            let last: Option<DateTime<Utc>> = w.lock().last_activity;
            match last {
                Some(t) => t >= cutoff,
                None => true,
            }
        });
        before - windows.len()
    }

    pub fn window_count(&self) -> usize {
        self.windows.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{Generator, NullGenerator};
    use crate::types::Role;

    fn manager(max_window_size: usize) -> WindowManager {
        let generator: Arc<dyn Generator> = Arc::new(NullGenerator);
        let summary_service = Arc::new(SummaryService::new(generator, 4000));
        WindowManager::new(summary_service, max_window_size, 24)
    }

    #[tokio::test]
    async fn add_message_is_visible_before_overflow() {
        let wm = manager(10);
        let msg = Message::new("s1", Role::User, "hello", None);
        wm.add_message("s1", msg.clone()).await.unwrap();
        let ctx = wm.get_conversation_context("s1");
        assert_eq!(ctx.recent_messages.len(), 1);
        assert_eq!(ctx.recent_messages[0].id, msg.id);
    }

    #[tokio::test]
    async fn overflow_triggers_summarization_and_trim() {
        let wm = manager(4);
        for i in 0..5 {
            let msg = Message::new("s1", Role::User, format!("turn {i}"), None);
            wm.add_message("s1", msg).await.unwrap();
        }
        let ctx = wm.get_conversation_context("s1");
        assert!(ctx.recent_messages.len() <= std::cmp::max(3, 4 / 2));
        assert!(ctx.summary.is_some());
    }

    #[tokio::test]
    async fn clear_history_removes_window() {
        let wm = manager(10);
        wm.add_message("s1", Message::new("s1", Role::User, "hi", None)).await.unwrap();
        wm.clear_history("s1");
        assert_eq!(wm.get_conversation_context("s1").recent_messages.len(), 0);
    }
}
