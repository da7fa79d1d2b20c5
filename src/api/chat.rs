//! Chat endpoints
//!
//! `GET /chat?message=` streams a one-off reply. `POST /chat` queues a message
//! in a conversation and `GET /chat/:conversation_id` streams (or replays) the
//! reply being generated for it.

use crate::api::chat::schemas::{ChatQuery, ContentFrame, ErrorFrame, SubmitMessage};
use crate::core::relay::Fragment;
use crate::core::services::GENERATION_FAILED;
use crate::core::traits::{ChatError, ConversationService};
use crate::infrastructure::entities::ConversationId;
use async_stream::stream;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query};
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;
use futures_util::{Stream, StreamExt};
use log::{debug, error, info};

/// Sentinel closing every event stream.
pub const DONE: &str = "[DONE]";

pub fn router() -> Router {
    Router::new()
        .route("/chat", get(chat_once).post(submit_message))
        .route("/chat/:conversation_id", get(subscribe))
        .route(
            "/chat/:conversation_id/messages",
            get(conversation_messages),
        )
}

async fn chat_once(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Query(query): Query<ChatQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ChatError> {
    let message = query
        .message
        .filter(|message| !message.is_empty())
        .ok_or(ChatError::MissingMessage)?;

    let mut fragments = conversation_service.reply_once(message).await?;

    let stream = stream! {
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(content) => yield Event::default().json_data(ContentFrame { content }),
                Err(e) => {
                    error!("one-off reply failed mid-stream: {e:#}");
                    yield Event::default().json_data(ErrorFrame { error: GENERATION_FAILED.to_owned() });
                    break;
                }
            }
        }

        yield Ok(Event::default().data(DONE));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn submit_message(
    Inject(conversation_service): Inject<dyn ConversationService>,
    submission: Result<Json<SubmitMessage>, JsonRejection>,
) -> Result<Json<schemas::SubmitResponse>, ChatError> {
    // a body that does not decode carries no usable message
    let Json(submission) = submission.map_err(|rejection| {
        debug!("rejected chat submission: {rejection}");
        ChatError::MissingMessage
    })?;

    let message = submission
        .message
        .filter(|message| !message.is_empty())
        .ok_or(ChatError::MissingMessage)?;
    let conversation_id = submission.conversation_id.and_then(ConversationId::parse);

    let conversation_id = conversation_service
        .submit_message(conversation_id, message)
        .await?;
    info!("accepted message for conversation {conversation_id}");

    Ok(Json(schemas::SubmitResponse { conversation_id }))
}

async fn subscribe(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Path(conversation_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ChatError> {
    let conversation_id =
        ConversationId::parse(conversation_id).ok_or(ChatError::UnknownConversation)?;
    let mut subscription = conversation_service.subscribe(&conversation_id).await?;

    let stream = stream! {
        while let Some(fragment) = subscription.next().await {
            match fragment {
                Fragment::Text(content) => yield Event::default().json_data(ContentFrame { content }),
                Fragment::Error(error) => yield Event::default().json_data(ErrorFrame { error }),
                Fragment::Done => break,
            }
        }

        yield Ok(Event::default().data(DONE));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn conversation_messages(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Path(conversation_id): Path<String>,
) -> Result<Json<schemas::MessagesList>, ChatError> {
    let conversation_id =
        ConversationId::parse(conversation_id).ok_or(ChatError::UnknownConversation)?;
    let messages = conversation_service.list_messages(&conversation_id).await?;

    Ok(Json(schemas::MessagesList {
        messages: messages.into_iter().map(schemas::Message::from).collect(),
    }))
}

pub mod schemas {
    use crate::core::assistant::Role;
    use crate::infrastructure::entities;
    use crate::infrastructure::entities::ConversationId;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct ChatQuery {
        pub message: Option<String>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct SubmitMessage {
        pub message: Option<String>,
        pub conversation_id: Option<String>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct SubmitResponse {
        pub conversation_id: ConversationId,
    }

    #[derive(Serialize, Debug)]
    pub struct ContentFrame {
        pub content: String,
    }

    #[derive(Serialize, Debug)]
    pub struct ErrorFrame {
        pub error: String,
    }

    #[derive(Serialize, Debug, Default)]
    pub struct MessagesList {
        pub messages: Vec<Message>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct Message {
        pub id: Uuid,
        pub role: Role,
        pub text: String,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Message> for Message {
        fn from(message: entities::Message) -> Self {
            Message {
                id: message.id,
                role: message.kind.into(),
                text: message.text,
                created_at: message.created_at,
            }
        }
    }
}
