//! Conversation entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use uuid::Uuid;

/// Opaque correlation key of a conversation.
///
/// Clients may pick their own; the server generates a UUID v4 otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn generate() -> ConversationId {
        ConversationId(Uuid::new_v4().to_string())
    }

    /// Returns `None` for blank ids.
    pub fn parse(raw: impl Into<String>) -> Option<ConversationId> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(ConversationId(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub text: String,
}

impl Message {
    pub fn new(kind: MessageKind, text: impl Into<String>) -> Message {
        Message {
            id: Uuid::new_v4(),
            kind,
            created_at: Utc::now(),
            text: text.into(),
        }
    }
}
