use crate::config::Settings;
use crate::util::truncate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OpenRouter chat completions endpoint
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const MAX_TOKENS: u32 = 8192;

/// Failure modes of one completion request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiServiceError {
    #[error(
        "No OpenRouter API key configured. Set OPENROUTER_API_KEY or add it to the config file."
    )]
    MissingApiKey,

    /// HTTP 429; `message` is the provider's body text
    #[error("429 rate limited: {message}")]
    RateLimited { message: String },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl AiServiceError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, AiServiceError::RateLimited { .. })
    }

    /// Lowercased error text, for quota/billing keyword checks
    pub fn signal_text(&self) -> String {
        self.to_string().to_lowercase()
    }
}

/// A chat-style text completion backend
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AiServiceError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// OpenRouter-backed [`CompletionService`]. Requests JSON output and makes a
/// single attempt; retry policy belongs to the caller.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            url: OPENROUTER_URL.to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.openrouter_api_key.clone(), settings.model.clone())
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl CompletionService for OpenRouterClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AiServiceError> {
        let api_key = self.api_key.as_deref().ok_or(AiServiceError::MissingApiKey)?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: MAX_TOKENS,
            stream: false,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Title", "patchpilot")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AiServiceError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AiServiceError::Transport(e.to_string()))?;

        if status.is_success() {
            let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                AiServiceError::Transport(format!(
                    "Failed to parse OpenRouter response: {} ({})",
                    e,
                    truncate(&text, 200)
                ))
            })?;
            return Ok(parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default());
        }

        Err(classify_failure(status.as_u16(), &text))
    }
}

fn classify_failure(status: u16, body: &str) -> AiServiceError {
    let message = truncate(body.trim(), 500);
    match status {
        429 => AiServiceError::RateLimited { message },
        401 => AiServiceError::Api {
            status,
            message: "Invalid API key".to_string(),
        },
        _ => AiServiceError::Api { status, message },
    }
}
