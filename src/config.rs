//! Runtime settings, read from the environment (and `.env` if present)

use di::inject;
use di::injectable;
use log::warn;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant that answers questions in a simple and direct way. \
Avoid long answers, use at most {{ max_characters }} characters.";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Address the HTTP server binds to.
    pub listen_addr: String,
    /// Base URL of the Ollama server.
    pub ollama_host: String,
    /// Model name passed to Ollama.
    pub model: String,
    /// Length limit announced to the model in the system preamble.
    pub max_response_chars: usize,
    /// Minijinja template for the system preamble. Receives `max_characters`.
    pub system_prompt_template: String,
    /// Conversations and response queues idle for this long are evicted.
    pub conversation_ttl: Duration,
    pub eviction_interval: Duration,
    /// Allowed CORS origins, any origin when empty.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen_addr: "0.0.0.0:4343".to_owned(),
            ollama_host: "http://localhost:11434".to_owned(),
            model: "gemma3:4b".to_owned(),
            max_response_chars: 2500,
            system_prompt_template: DEFAULT_SYSTEM_PROMPT.to_owned(),
            conversation_ttl: Duration::from_secs(60 * 60),
            eviction_interval: Duration::from_secs(60),
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[injectable]
impl Settings {
    #[inject]
    pub fn from_env() -> Settings {
        dotenvy::dotenv().ok();
        let defaults = Settings::default();

        Settings {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            ollama_host: env::var("OLLAMA_HOST")
                .map(|host| host.trim_end_matches('/').to_owned())
                .unwrap_or(defaults.ollama_host),
            model: env::var("MODEL_NAME").unwrap_or(defaults.model),
            max_response_chars: parse_var("MAX_RESPONSE_CHARS", defaults.max_response_chars),
            system_prompt_template: env::var("SYSTEM_PROMPT")
                .unwrap_or(defaults.system_prompt_template),
            conversation_ttl: Duration::from_secs(parse_var(
                "CONVERSATION_TTL_SECS",
                defaults.conversation_ttl.as_secs(),
            )),
            eviction_interval: Duration::from_secs(parse_var(
                "EVICTION_INTERVAL_SECS",
                defaults.eviction_interval.as_secs(),
            )),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|origins| split_origins(&origins))
                .unwrap_or(defaults.cors_allowed_origins),
        }
    }
}

fn parse_var<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => T::from_str(raw.trim()).unwrap_or_else(|_| {
            warn!("ignoring invalid value {raw:?} for {name}");
            default
        }),
        Err(_) => default,
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_owned)
        .collect()
}
