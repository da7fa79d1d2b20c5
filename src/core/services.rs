//! Implementations for the service the app needs.
//!

use crate::core::assistant::{ChatMessage, SystemPrompt};
use crate::core::relay::{Fragment, ResponseRelay, Subscription};
use crate::core::traits::{ChatError, ConversationService};
use crate::infrastructure::entities::{ConversationId, Message, MessageKind};
use crate::infrastructure::traits::{ChatBackend, ConversationRepository, TextStream};
use async_trait::async_trait;
use di::{Ref, injectable};
use futures_util::StreamExt;
use log::{error, info, warn};

/// Text pushed to listeners when generation fails.
pub const GENERATION_FAILED: &str = "Failed to process the message";

#[injectable(ConversationService)]
pub struct ChatConversationService {
    repo: Ref<dyn ConversationRepository>,
    backend: Ref<dyn ChatBackend>,
    relay: Ref<ResponseRelay>,
    prompt: Ref<SystemPrompt>,
}

#[async_trait]
impl ConversationService for ChatConversationService {
    async fn reply_once(&self, message: String) -> Result<TextStream, ChatError> {
        if message.is_empty() {
            return Err(ChatError::MissingMessage);
        }

        self.backend
            .chat_stream(vec![self.prompt.message(), ChatMessage::user(message)])
            .await
            .map_err(ChatError::Backend)
    }

    async fn submit_message(
        &self,
        conversation_id: Option<ConversationId>,
        message: String,
    ) -> Result<ConversationId, ChatError> {
        if message.is_empty() {
            return Err(ChatError::MissingMessage);
        }

        let conversation_id = conversation_id.unwrap_or_else(ConversationId::generate);
        if self.repo.find_conversation(&conversation_id).await.is_none() {
            self.repo
                .create_conversation(conversation_id.clone(), self.prompt.entity())
                .await;
        }

        self.relay.open(&conversation_id)?;

        if let Err(e) = self
            .repo
            .append_message(&conversation_id, Message::new(MessageKind::User, message))
            .await
        {
            // evicted between lookup and append
            self.relay.push(&conversation_id, Fragment::Done);
            return Err(ChatError::Backend(e));
        }

        let history: Vec<ChatMessage> = self
            .repo
            .list_conversation_messages(&conversation_id)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(ChatMessage::from)
            .collect();

        tokio::spawn(generate_reply(
            self.backend.clone(),
            self.repo.clone(),
            self.relay.clone(),
            conversation_id.clone(),
            history,
        ));

        Ok(conversation_id)
    }

    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Subscription, ChatError> {
        self.relay
            .subscribe(conversation_id)
            .ok_or(ChatError::UnknownConversation)
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ChatError> {
        self.repo
            .list_conversation_messages(conversation_id)
            .await
            .ok_or(ChatError::UnknownConversation)
    }
}

/// Runs one generation to completion, relaying every fragment.
///
/// Always ends the response queue with [`Fragment::Done`], preceded by an
/// error fragment if the backend failed.
async fn generate_reply(
    backend: Ref<dyn ChatBackend>,
    repo: Ref<dyn ConversationRepository>,
    relay: Ref<ResponseRelay>,
    conversation_id: ConversationId,
    history: Vec<ChatMessage>,
) {
    info!(
        "generating reply for conversation {conversation_id} ({} messages of history)",
        history.len()
    );

    let outcome = relay_fragments(backend, &relay, &conversation_id, history).await;

    match outcome {
        Ok((reply, fragments)) => {
            info!("reply for conversation {conversation_id} done, {fragments} fragments");
            if let Err(e) = repo
                .append_message(&conversation_id, Message::new(MessageKind::Assistant, reply))
                .await
            {
                warn!("could not store reply for conversation {conversation_id}: {e}");
            }
        }
        Err(e) => {
            error!("generation for conversation {conversation_id} failed: {e:#}");
            relay.push(&conversation_id, Fragment::Error(GENERATION_FAILED.to_owned()));
        }
    }

    relay.push(&conversation_id, Fragment::Done);
}

/// Returns the complete reply and the number of fragments relayed.
async fn relay_fragments(
    backend: Ref<dyn ChatBackend>,
    relay: &ResponseRelay,
    conversation_id: &ConversationId,
    history: Vec<ChatMessage>,
) -> anyhow::Result<(String, usize)> {
    let mut stream = backend.chat_stream(history).await?;
    let mut reply = String::new();
    let mut fragments = 0;

    while let Some(part) = stream.next().await {
        let part = part?;
        reply.push_str(&part);
        fragments += 1;
        relay.push(conversation_id, Fragment::Text(part));
    }

    Ok((reply, fragments))
}
