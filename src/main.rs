//! HTTP relay streaming replies from a local Ollama model
//!

use ollama_chat_relay::api;
use ollama_chat_relay::config::Settings;
use ollama_chat_relay::core::assistant::SystemPrompt;
use ollama_chat_relay::core::relay::ResponseRelay;
use ollama_chat_relay::core::services::ChatConversationService;
use ollama_chat_relay::infrastructure::ollama::OllamaBackend;
use ollama_chat_relay::infrastructure::repositories::InMemoryConversationRepository;
use ollama_chat_relay::infrastructure::traits::ConversationRepository;

use anyhow::anyhow;
use axum::http::{HeaderValue, Method};
use di::{Injectable, Ref, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use log::{info, warn};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(web_server_task())
}

async fn web_server_task() -> anyhow::Result<()> {
    let provider = ServiceCollection::new()
        .add(Settings::singleton())
        .add(SystemPrompt::singleton())
        .add(OllamaBackend::singleton())
        .add(InMemoryConversationRepository::singleton())
        .add(ResponseRelay::singleton())
        .add(ChatConversationService::scoped())
        .build_provider()
        .map_err(|e| anyhow!("invalid service registrations: {e:?}"))?;

    let settings = provider.get_required::<Settings>();
    tokio::spawn(eviction_task(
        settings.clone(),
        provider.get_required::<dyn ConversationRepository>(),
        provider.get_required::<ResponseRelay>(),
    ));

    let app = api::router()
        .layer(cors_layer(&settings))
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr).await?;
    info!(
        "listening on {}, relaying to model {} at {}",
        listener.local_addr()?,
        settings.model,
        settings.ollama_host
    );
    axum::serve(listener, app).await?;
    info!("Shutting down...");

    Ok(())
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(allow_origin)
}

/// Periodically drops idle conversations and abandoned response queues.
async fn eviction_task(
    settings: Ref<Settings>,
    repo: Ref<dyn ConversationRepository>,
    relay: Ref<ResponseRelay>,
) {
    let mut interval =
        tokio::time::interval(settings.eviction_interval.max(Duration::from_secs(1)));
    loop {
        interval.tick().await;

        let conversations = repo.evict_idle(settings.conversation_ttl).await;
        let queues = relay.evict_idle(settings.conversation_ttl);
        if conversations > 0 || queues > 0 {
            info!("evicted {conversations} idle conversations and {queues} response queues");
        }
    }
}
