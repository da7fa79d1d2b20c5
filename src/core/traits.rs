//! DI "Interfaces"

use crate::core::relay::{RelayError, Subscription};
use crate::infrastructure::entities;
use crate::infrastructure::entities::ConversationId;
use crate::infrastructure::traits::TextStream;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message is required")]
    MissingMessage,

    #[error("A response is already being generated for this conversation")]
    Busy,

    #[error("Conversation not found")]
    UnknownConversation,

    #[error("Failed to process the message")]
    Backend(#[source] anyhow::Error),
}

impl From<RelayError> for ChatError {
    fn from(error: RelayError) -> Self {
        match error {
            RelayError::Busy => ChatError::Busy,
        }
    }
}

#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Streams a reply to a single message, without any conversation state.
    ///
    /// Returns `Err` if the backend could not start generating.
    async fn reply_once(&self, message: String) -> Result<TextStream, ChatError>;

    /// Stores a user message and starts generating the reply in the background.
    ///
    /// Creates the conversation when `conversation_id` is `None` or unknown, and returns the id
    /// listeners should subscribe to. Returns `Err` if a reply is still being generated for the
    /// conversation.
    async fn submit_message(
        &self,
        conversation_id: Option<ConversationId>,
        message: String,
    ) -> Result<ConversationId, ChatError>;

    /// Attaches to the pending (or finished but unconsumed) reply of a conversation.
    async fn subscribe(&self, conversation_id: &ConversationId)
    -> Result<Subscription, ChatError>;

    /// List all messages in a conversation.
    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<entities::Message>, ChatError>;
}
