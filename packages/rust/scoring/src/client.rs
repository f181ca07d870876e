//! Language-model endpoint interface and the chat-completions implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use paperscout_shared::{AiConfig, PaperScoutError, Result, resolve_api_key};

/// User-Agent string for endpoint requests.
const USER_AGENT: &str = concat!("PaperScout/", env!("CARGO_PKG_VERSION"));

/// A text-completion endpoint.
///
/// Returns the raw completion text; the caller parses the structured
/// score/rationale pair out of it and treats malformed output as a soft
/// failure.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_payload: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug)]
pub struct ChatCompletionsClient {
    client: Client,
    endpoint: Url,
    model: String,
    temperature: f32,
    api_key: String,
}

impl ChatCompletionsClient {
    /// Build a client from run AI settings; fails fast on a missing API key.
    pub fn new(ai: &AiConfig) -> Result<Self> {
        let api_key = resolve_api_key(ai)?;

        let base = Url::parse(&ai.base_url)
            .map_err(|e| PaperScoutError::config(format!("bad AI base URL: {e}")))?;
        let endpoint = base
            .join("/chat/completions")
            .map_err(|e| PaperScoutError::config(format!("bad AI base URL: {e}")))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(ai.timeout_secs))
            .build()
            .map_err(|e| PaperScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            model: ai.model.clone(),
            temperature: ai.temperature,
            api_key,
        })
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionsClient {
    async fn complete(&self, system_prompt: &str, user_payload: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_payload,
                },
            ],
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(self.endpoint.as_str())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PaperScoutError::Network(format!("completion endpoint: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(PaperScoutError::rate_limited(format!(
                "completion endpoint: HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(PaperScoutError::Network(format!(
                "completion endpoint: HTTP {status}"
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| PaperScoutError::parse(format!("completion response: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PaperScoutError::parse("completion response has no choices"))?;

        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}
