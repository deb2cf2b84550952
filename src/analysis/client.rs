//! Completion provider clients
//!
//! Analyzers receive an `Arc<dyn CompletionClient>` at construction time.
//! [`OpenAiClient`] talks to any OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::{IntelligenceError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the conversation
    System,
    /// Caller-supplied input
    User,
    /// Model output
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced the message
    pub role: Role,
    /// Message text; a `null` from the provider reads as empty
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatMessage {
    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Provider-neutral completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Provider model name
    pub model: String,
    /// Conversation, system message first
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature
    pub temperature: f32,
    /// Upper bound on generated tokens
    pub max_tokens: Option<u32>,
    /// Ask the provider to constrain output to a JSON object
    pub json_response: bool,
}

impl CompletionRequest {
    /// Body for an OpenAI-compatible `/chat/completions` call
    pub fn to_wire(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.messages,
            "temperature": self.temperature,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if self.json_response {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

/// One returned choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    /// Position among the returned choices
    #[serde(default)]
    pub index: u32,
    /// Generated message
    pub message: ChatMessage,
    /// Why generation stopped, e.g. `stop` or `length`
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the request
    pub prompt_tokens: u32,
    /// Tokens generated
    pub completion_tokens: u32,
    /// Sum of both
    pub total_tokens: u32,
}

/// Raw provider response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Provider-assigned response id
    #[serde(default)]
    pub id: String,
    /// Model that served the request
    #[serde(default)]
    pub model: String,
    /// Returned choices
    pub choices: Vec<CompletionChoice>,
    /// Token accounting, when the provider reports it
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// Content of the first choice, if any
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A capability that turns one request into one provider response
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Issue a single completion call
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Model used when an analyzer does not pick one
    fn default_model(&self) -> &str;
}

/// Configuration for [`OpenAiClient`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API root; `/chat/completions` is appended
    pub base_url: String,
    /// Bearer token
    pub api_key: String,
    /// Model used when an analyzer does not pick one
    pub default_model: String,
    /// Whole-request timeout for the HTTP client
    pub request_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl OpenAiConfig {
    /// Read `OPENAI_API_KEY` (required), `OPENAI_BASE_URL` and `OPENAI_MODEL`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`OpenAiConfig::from_env`] but reads variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                IntelligenceError::Configuration("OPENAI_API_KEY is not set".to_string())
            })?;

        let mut config = Self {
            api_key,
            ..Default::default()
        };
        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            config.default_model = model;
        }
        Ok(config)
    }
}

/// Client for OpenAI-compatible chat-completions endpoints
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    /// Build the client once; it is shared by every analyzer that receives it
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(IntelligenceError::Configuration(
                "api_key must not be empty".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request.to_wire())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, "Completion request rejected");
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => IntelligenceError::RateLimited(body),
                _ => IntelligenceError::Client(format!("{status}: {body}")),
            });
        }

        let parsed = resp.json::<CompletionResponse>().await?;
        debug!(
            response_id = %parsed.id,
            choices = parsed.choices.len(),
            "Completion received"
        );
        Ok(parsed)
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }
}
