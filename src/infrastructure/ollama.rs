//! Ollama chat client
//!
//! Talks to `POST /api/chat` with `stream: true`. Ollama answers with
//! newline-delimited JSON, one object per generated fragment:
//!
//! ```text
//! {"message":{"role":"assistant","content":"Hel"},"done":false}
//! {"message":{"role":"assistant","content":"lo"},"done":false}
//! {"message":{"role":"assistant","content":""},"done":true}
//! ```
//!
//! Failures mid-stream arrive as `{"error":"..."}`.

use crate::config::Settings;
use crate::core::assistant::ChatMessage;
use crate::infrastructure::traits::{ChatBackend, TextStream};
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use di::{Ref, inject, injectable};
use futures_util::{Stream, StreamExt};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub struct OllamaBackend {
    chat_url: String,
    model: String,
    http_client: reqwest::Client,
}

#[injectable(ChatBackend)]
impl OllamaBackend {
    #[inject]
    pub fn create(settings: Ref<Settings>) -> OllamaBackend {
        OllamaBackend::new(&settings.ollama_host, &settings.model)
    }
}

impl OllamaBackend {
    pub fn new(host: &str, model: &str) -> OllamaBackend {
        OllamaBackend {
            chat_url: format!("{}/api/chat", host.trim_end_matches('/')),
            model: model.to_owned(),
            http_client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// What a single NDJSON line means for the reply.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkEvent {
    Content(String),
    Done,
}

/// Decodes one NDJSON line. Blank lines and empty fragments yield nothing.
pub fn parse_line(line: &str) -> anyhow::Result<Vec<ChunkEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }

    let chunk: ChatChunk =
        serde_json::from_str(line).with_context(|| format!("malformed chunk: {line}"))?;

    if let Some(error) = chunk.error {
        bail!("ollama reported an error: {error}");
    }

    let mut events = Vec::new();
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            events.push(ChunkEvent::Content(message.content));
        }
    }
    if chunk.done {
        events.push(ChunkEvent::Done);
    }
    Ok(events)
}

/// Reassembles lines from a byte stream chunked at arbitrary boundaries.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends bytes and returns every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Returns the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let rest = std::mem::take(&mut self.pending);
            Some(String::from_utf8_lossy(&rest).into_owned())
        }
    }
}

/// Turns the raw NDJSON body into reply fragments, stopping at `done`.
pub fn decode_fragments<S, B, E>(byte_stream: S) -> impl Stream<Item = anyhow::Result<String>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    async_stream::try_stream! {
        futures_util::pin_mut!(byte_stream);
        let mut buffer = LineBuffer::default();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| anyhow!("ollama stream read error: {e}"))?;

            for line in buffer.push(chunk.as_ref()) {
                for event in parse_line(&line)? {
                    match event {
                        ChunkEvent::Content(content) => yield content,
                        ChunkEvent::Done => return,
                    }
                }
            }
        }

        if let Some(line) = buffer.finish() {
            for event in parse_line(&line)? {
                if let ChunkEvent::Content(content) = event {
                    yield content;
                }
            }
        }
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    async fn chat_stream(&self, messages: Vec<ChatMessage>) -> anyhow::Result<TextStream> {
        debug!(
            "requesting chat completion from {} with {} messages",
            self.chat_url,
            messages.len()
        );

        let response = self
            .http_client
            .post(&self.chat_url)
            .json(&ChatRequest {
                model: &self.model,
                messages: &messages,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| anyhow!("ollama request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("ollama returned {status}: {body}");
        }

        Ok(decode_fragments(response.bytes_stream()).boxed())
    }
}
