//! API Integration Tests
//!
//! Drives the HTTP routes through the DI container with a scripted chat
//! backend standing in for Ollama. The backend echoes the last user message
//! word by word, except for a few trigger messages:
//!
//! - `fail`: the request to the backend fails
//! - `break`: one fragment, then the stream fails
//! - `stall`: the stream never produces anything

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use di::{Injectable, ServiceCollection, inject, injectable};
use di_axum::RouterServiceProviderExtensions;
use futures_util::StreamExt;
use ollama_chat_relay::{
    api,
    config::Settings,
    core::assistant::{ChatMessage, SystemPrompt},
    core::relay::ResponseRelay,
    core::services::ChatConversationService,
    infrastructure::repositories::InMemoryConversationRepository,
    infrastructure::traits::{ChatBackend, TextStream},
};
use serde_json::Value;
use tower::ServiceExt;

struct EchoBackend;

#[injectable(ChatBackend)]
impl EchoBackend {
    #[inject]
    fn create() -> EchoBackend {
        EchoBackend
    }
}

#[async_trait]
impl ChatBackend for EchoBackend {
    async fn chat_stream(&self, messages: Vec<ChatMessage>) -> anyhow::Result<TextStream> {
        let last = messages
            .last()
            .map(|m| m.content().to_owned())
            .unwrap_or_default();

        match last.as_str() {
            "fail" => Err(anyhow!("connection refused")),
            "break" => Ok(futures_util::stream::iter(vec![
                Ok("par".to_owned()),
                Err(anyhow!("connection reset")),
            ])
            .boxed()),
            "stall" => Ok(futures_util::stream::pending().boxed()),
            text => {
                let words: Vec<anyhow::Result<String>> = text
                    .split_inclusive(' ')
                    .map(|word| Ok(word.to_owned()))
                    .collect();
                Ok(futures_util::stream::iter(words).boxed())
            }
        }
    }
}

fn create_test_app() -> axum::Router {
    let provider = ServiceCollection::new()
        .add(Settings::singleton())
        .add(SystemPrompt::singleton())
        .add(EchoBackend::singleton())
        .add(InMemoryConversationRepository::singleton())
        .add(ResponseRelay::singleton())
        .add(ChatConversationService::scoped())
        .build_provider()
        .unwrap();

    api::router().with_provider(provider)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, json: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

/// Payloads of the `data:` lines of an event stream, keep-alive comments skipped.
fn sse_data(body: &str) -> Vec<String> {
    body.split("\n\n")
        .flat_map(|event| event.lines())
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim_start().to_owned())
        .collect()
}

async fn submit(app: &axum::Router, body: Value) -> String {
    let (status, body) = send(app, post_json("/chat", body)).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    json["conversationId"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn test_index() {
    let app = create_test_app();

    let (status, body) = send(&app, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["message"], "Server is running!");
}

#[tokio::test]
async fn test_chat_once_requires_message() {
    let app = create_test_app();

    for uri in ["/chat", "/chat?message="] {
        let (status, body) = send(&app, get(uri)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "Message is required");
    }
}

#[tokio::test]
async fn test_chat_once_streams_content_then_done() {
    let app = create_test_app();

    let response = app
        .clone()
        .oneshot(get("/chat?message=hello%20there%20friend"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let frames = sse_data(std::str::from_utf8(&body).unwrap());

    assert_eq!(
        frames,
        vec![
            r#"{"content":"hello "}"#,
            r#"{"content":"there "}"#,
            r#"{"content":"friend"}"#,
            "[DONE]",
        ]
    );
}

#[tokio::test]
async fn test_chat_once_backend_failure_is_500() {
    let app = create_test_app();

    let (status, body) = send(&app, get("/chat?message=fail")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["error"], "Failed to process the message");
}

#[tokio::test]
async fn test_chat_once_mid_stream_failure_still_ends_with_done() {
    let app = create_test_app();

    let (status, body) = send(&app, get("/chat?message=break")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        sse_data(&body),
        vec![
            r#"{"content":"par"}"#,
            r#"{"error":"Failed to process the message"}"#,
            "[DONE]",
        ]
    );
}

#[tokio::test]
async fn test_submit_requires_message() {
    let app = create_test_app();

    for body in [
        serde_json::json!({}),
        serde_json::json!({ "message": "" }),
        serde_json::json!({ "conversationId": "abc" }),
        serde_json::json!({ "message": 42 }),
    ] {
        let (status, _) = send(&app, post_json("/chat", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_submit_without_json_body_is_400() {
    let app = create_test_app();

    let no_body = Request::builder()
        .method("POST")
        .uri("/chat")
        .body(Body::empty())
        .unwrap();
    let plain_text = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))
        .unwrap();

    for request in [no_body, plain_text] {
        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "Message is required");
    }
}

#[tokio::test]
async fn test_submit_generates_conversation_id() {
    let app = create_test_app();

    let first = submit(&app, serde_json::json!({ "message": "hi" })).await;
    let second = submit(&app, serde_json::json!({ "message": "hi" })).await;

    assert!(!first.is_empty());
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_submit_keeps_client_conversation_id() {
    let app = create_test_app();

    let id = submit(
        &app,
        serde_json::json!({ "message": "hi", "conversationId": "browser-tab-1" }),
    )
    .await;

    assert_eq!(id, "browser-tab-1");
}

#[tokio::test]
async fn test_subscribe_replays_reply() {
    let app = create_test_app();
    let id = submit(&app, serde_json::json!({ "message": "one two three" })).await;

    let (status, body) = send(&app, get(&format!("/chat/{id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        sse_data(&body),
        vec![
            r#"{"content":"one "}"#,
            r#"{"content":"two "}"#,
            r#"{"content":"three"}"#,
            "[DONE]",
        ]
    );
}

#[tokio::test]
async fn test_subscribe_after_consumption_is_404() {
    let app = create_test_app();
    let id = submit(&app, serde_json::json!({ "message": "once" })).await;

    let (status, _) = send(&app, get(&format!("/chat/{id}"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get(&format!("/chat/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["error"], "Conversation not found");
}

#[tokio::test]
async fn test_subscribe_unknown_conversation_is_404() {
    let app = create_test_app();

    let (status, _) = send(&app, get("/chat/does-not-exist")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_subscribe_backend_failure_sends_error_then_done() {
    let app = create_test_app();
    let id = submit(&app, serde_json::json!({ "message": "fail" })).await;

    let (status, body) = send(&app, get(&format!("/chat/{id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        sse_data(&body),
        vec![r#"{"error":"Failed to process the message"}"#, "[DONE]"]
    );
}

#[tokio::test]
async fn test_submit_while_generating_is_409() {
    let app = create_test_app();
    let id = submit(&app, serde_json::json!({ "message": "stall" })).await;

    let (status, body) = send(
        &app,
        post_json(
            "/chat",
            serde_json::json!({ "message": "hello?", "conversationId": id }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("already"));
}

#[tokio::test]
async fn test_conversation_history() {
    let app = create_test_app();
    let id = submit(&app, serde_json::json!({ "message": "remember me" })).await;
    send(&app, get(&format!("/chat/{id}"))).await;

    let (status, body) = send(&app, get(&format!("/chat/{id}/messages"))).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    let messages = json["messages"].as_array().unwrap();
    let roles: Vec<&str> = messages
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["system", "user", "assistant"]);
    assert_eq!(messages[1]["text"], "remember me");
    assert_eq!(messages[2]["text"], "remember me");
    assert!(messages[0]["createdAt"].is_string());
}

#[tokio::test]
async fn test_follow_up_in_same_conversation() {
    let app = create_test_app();
    let id = submit(&app, serde_json::json!({ "message": "first" })).await;
    send(&app, get(&format!("/chat/{id}"))).await;

    let again = submit(
        &app,
        serde_json::json!({ "message": "second turn", "conversationId": id }),
    )
    .await;
    assert_eq!(again, id);

    let (_, body) = send(&app, get(&format!("/chat/{id}"))).await;
    assert_eq!(
        sse_data(&body),
        vec![
            r#"{"content":"second "}"#,
            r#"{"content":"turn"}"#,
            "[DONE]",
        ]
    );

    let (_, body) = send(&app, get(&format!("/chat/{id}/messages"))).await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["messages"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_messages_of_unknown_conversation_is_404() {
    let app = create_test_app();

    let (status, _) = send(&app, get("/chat/nope/messages")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
