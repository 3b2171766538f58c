//! Conversation state owned by the session loop.
//!
//! `History` keeps the system prompt pinned at index 0; every other entry is
//! appended in chronological order and only a full `restore` can drop them.

use serde::{Deserialize, Serialize};

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "system" => Some(ChatRole::System),
            "user" => Some(ChatRole::User),
            "assistant" => Some(ChatRole::Assistant),
            _ => None,
        }
    }
}

/// Ordered conversation history, always headed by one system message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    messages: Vec<ChatMessage>,
}

impl History {
    pub fn new(system_prompt: &str) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    /// Replace everything after the system message with `turns`.
    ///
    /// Callers validate roles beforehand; system entries are dropped here so
    /// the head invariant cannot be broken.
    pub fn restore(&mut self, turns: Vec<ChatMessage>) {
        self.messages.truncate(1);
        self.messages
            .extend(turns.into_iter().filter(|m| m.role != ChatRole::System));
    }

    /// Copy of the history with one extra message that is never persisted.
    pub fn with_hidden(&self, hidden: ChatMessage) -> Vec<ChatMessage> {
        let mut messages = self.messages.clone();
        messages.push(hidden);
        messages
    }
}

/// Read-only settings resolved at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub model_id: String,
    pub summary_model: String,
    pub system_prompt: String,
    pub ollama_url: Option<String>,
}
