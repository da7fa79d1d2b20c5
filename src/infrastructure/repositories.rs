//! In-memory conversation store

use crate::infrastructure::entities::{Conversation, ConversationId, Message};
use crate::infrastructure::traits::ConversationRepository;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use di::{inject, injectable};
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
}

#[injectable(ConversationRepository)]
impl InMemoryConversationRepository {
    #[inject]
    pub fn create() -> InMemoryConversationRepository {
        InMemoryConversationRepository::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.conversations.read().get(id).cloned()
    }

    async fn create_conversation(
        &self,
        id: ConversationId,
        system_message: Message,
    ) -> Conversation {
        let mut conversations = self.conversations.write();
        conversations
            .entry(id.clone())
            .or_insert_with(|| {
                debug!("creating conversation {id}");
                let now = Utc::now();
                Conversation {
                    id,
                    created_at: now,
                    last_activity: now,
                    messages: vec![system_message],
                }
            })
            .clone()
    }

    async fn list_conversation_messages(&self, id: &ConversationId) -> Option<Vec<Message>> {
        self.conversations
            .read()
            .get(id)
            .map(|conversation| conversation.messages.clone())
    }

    async fn append_message(
        &self,
        id: &ConversationId,
        message: Message,
    ) -> anyhow::Result<Message> {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| anyhow!("conversation {id} does not exist"))?;

        conversation.last_activity = Utc::now();
        conversation.messages.push(message.clone());
        Ok(message)
    }

    async fn evict_idle(&self, ttl: Duration) -> usize {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();

        let mut conversations = self.conversations.write();
        let before = conversations.len();
        conversations.retain(|_, conversation| now - conversation.last_activity < ttl);
        before - conversations.len()
    }
}
