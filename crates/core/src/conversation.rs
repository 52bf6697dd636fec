//! Conversation history for the chat agent.

use chrono::{DateTime, Utc};

/// Speaker role, mapped directly onto the chat API's role strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub finished_at: DateTime<Utc>,
}

/// Append-only message history for one session.
///
/// Submitting a turn to the chat stage passes the conversation by value, so
/// the stream works against a snapshot and the session may keep appending
/// without racing it.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub started_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Single-user-message conversation, used for side prompts.
    pub fn from_user_text(text: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.add(Role::User, text);
        conversation
    }

    pub fn add(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message {
            role,
            content: content.into(),
            finished_at: Utc::now(),
        });
    }

    pub fn last_prompt(&self) -> &str {
        self.messages
            .last()
            .map(|message| message.content.as_str())
            .unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn debug_log(&self) {
        tracing::debug!(message_count = self.messages.len(), "dumping conversation");
        for (i, message) in self.messages.iter().enumerate() {
            let since_started = (message.finished_at - self.started_at).num_milliseconds();
            tracing::debug!(
                i,
                role = message.role.as_str(),
                since_started_ms = since_started,
                "{}",
                message.content
            );
        }
    }
}
