//! Infrastructure traits, used for DI on higher levels

use crate::core::assistant::ChatMessage;
use crate::infrastructure::entities;
use crate::infrastructure::entities::ConversationId;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::time::Duration;

/// Lazily generated text fragments of a model reply.
pub type TextStream = BoxStream<'static, anyhow::Result<String>>;

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_conversation(&self, id: &ConversationId) -> Option<entities::Conversation>;

    /// Creates a conversation seeded with the given system message.
    ///
    /// An existing conversation with the same id is returned untouched.
    async fn create_conversation(
        &self,
        id: ConversationId,
        system_message: entities::Message,
    ) -> entities::Conversation;

    async fn list_conversation_messages(
        &self,
        id: &ConversationId,
    ) -> Option<Vec<entities::Message>>;

    /// Fails when the conversation does not exist.
    async fn append_message(
        &self,
        id: &ConversationId,
        message: entities::Message,
    ) -> anyhow::Result<entities::Message>;

    /// Drops conversations without activity for at least `ttl`, returns how many.
    async fn evict_idle(&self, ttl: Duration) -> usize;
}

/// A chat model that streams its reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat_stream(&self, messages: Vec<ChatMessage>) -> anyhow::Result<TextStream>;
}
