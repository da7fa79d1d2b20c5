//! Chat messages sent to the model and the system preamble.
//!

use crate::config::Settings;
use crate::infrastructure::entities;
use di::{Ref, inject, injectable};
use log::error;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    role: Role,
    content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> ChatMessage {
        ChatMessage {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> ChatMessage {
        ChatMessage {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl From<entities::MessageKind> for Role {
    fn from(kind: entities::MessageKind) -> Self {
        match kind {
            entities::MessageKind::System => Role::System,
            entities::MessageKind::User => Role::User,
            entities::MessageKind::Assistant => Role::Assistant,
        }
    }
}

impl From<entities::Message> for ChatMessage {
    fn from(m: entities::Message) -> Self {
        Self {
            content: m.text,
            role: m.kind.into(),
        }
    }
}

/// The system preamble prepended to every conversation.
pub struct SystemPrompt {
    text: String,
}

#[injectable]
impl SystemPrompt {
    #[inject]
    pub fn create(settings: Ref<Settings>) -> SystemPrompt {
        SystemPrompt::render(&settings.system_prompt_template, settings.max_response_chars)
    }
}

impl SystemPrompt {
    /// Renders the template with `max_characters` in scope. A broken template is used verbatim.
    pub fn render(template: &str, max_characters: usize) -> SystemPrompt {
        let env = minijinja::Environment::new();
        let text = env
            .render_str(template, minijinja::context! { max_characters => max_characters })
            .unwrap_or_else(|e| {
                error!("failed to render system prompt template: {e}");
                template.to_owned()
            });

        SystemPrompt { text }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn message(&self) -> ChatMessage {
        ChatMessage::system(self.text.clone())
    }

    pub fn entity(&self) -> entities::Message {
        entities::Message::new(entities::MessageKind::System, self.text.clone())
    }
}
