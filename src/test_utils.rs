//! Test utilities for StreamChat
//!
//! In-memory [`ChatStore`] with failure injection, plus helpers for building
//! stream lines.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::{ChatError, Result};
use crate::session::collaborators::ChatStore;
use crate::session::message::{Conversation, Message, Role, DEFAULT_CONVERSATION_TITLE};
use crate::storage::InsertFeed;

/// Build a `data:` line carrying one content fragment
///
/// # Examples
///
/// ```ignore
/// let line = delta_line("Hel");
/// assert_eq!(line, r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#);
/// ```
pub fn delta_line(content: &str) -> String {
    let payload = serde_json::json!({ "choices": [{ "delta": { "content": content } }] });
    format!("data: {}", payload)
}

#[derive(Default)]
struct MemoryState {
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    failing_roles: HashSet<Role>,
    ticks: i64,
    next_id: u64,
}

impl MemoryState {
    /// Strictly increasing fake clock so ordering never ties.
    fn tick(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::milliseconds(self.ticks)
    }

    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:04}", prefix, self.next_id)
    }
}

/// In-memory store that publishes inserts like the SQLite store does
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    feed: InsertFeed,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            feed: InsertFeed::default(),
        }
    }

    pub fn feed(&self) -> InsertFeed {
        self.feed.clone()
    }

    /// Make every future `create_message` for `role` fail.
    pub fn fail_role(&self, role: Role) {
        self.state.lock().unwrap().failing_roles.insert(role);
    }

    /// Insert a conversation directly and return its id.
    pub fn insert_conversation(&self, title: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.id("conv-");
        let updated_at = state.tick();
        state.conversations.push(Conversation {
            id: id.clone(),
            title: title.to_string(),
            updated_at,
        });
        id
    }

    pub fn conversation(&self, id: &str) -> Option<Conversation> {
        let state = self.state.lock().unwrap();
        state.conversations.iter().find(|c| c.id == id).cloned()
    }

    pub fn all_messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.clone()
    }
}

#[async_trait::async_trait]
impl ChatStore for MemoryStore {
    async fn create_conversation(&self) -> Result<Conversation> {
        let id = self.insert_conversation(DEFAULT_CONVERSATION_TITLE);
        self.conversation(&id)
            .ok_or_else(|| ChatError::ConversationNotFound(id).into())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut list = self.state.lock().unwrap().conversations.clone();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversation(id))
    }

    async fn update_conversation_title(&self, id: &str, title: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
        conversation.title = title.to_string();
        Ok(())
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        let message = {
            let mut state = self.state.lock().unwrap();
            if state.failing_roles.contains(&role) {
                return Err(ChatError::Storage("injected failure".to_string()).into());
            }
            let now = state.tick();
            let id = state.id("msg-");
            let conversation = state
                .conversations
                .iter_mut()
                .find(|c| c.id == conversation_id)
                .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_string()))?;
            conversation.updated_at = now;

            let message = Message::persisted(id, now, role, conversation_id, content);
            state.messages.push(message.clone());
            message
        };

        self.feed.publish(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}
