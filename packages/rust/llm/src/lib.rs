//! OpenAI-compatible chat-completions client.
//!
//! [`ChatClient`] implements the [`Completion`] port against any server that
//! speaks `POST {base_url}/chat/completions`, including local gateways.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use pencraft_shared::{
    Capability, Completion, CompletionRequest, LlmConfig, PencraftError, Result, resolve_api_key,
};

/// User-Agent string for completion requests.
const USER_AGENT: &str = concat!("Pencraft/", env!("CARGO_PKG_VERSION"));

/// Longest error body echoed back in a failure message.
const MAX_ERROR_BODY: usize = 500;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// API root without the `/chat/completions` suffix.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl ChatOptions {
    /// Build options from the `[llm]` config section, resolving the API key from the environment.
    pub fn from_config(config: &LlmConfig, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key: resolve_api_key(config)?,
            timeout_secs,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Chat-completions client. Cheap to clone; share one per process.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    endpoint: String,
    options: ChatOptions,
}

impl ChatClient {
    pub fn new(options: ChatOptions) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| PencraftError::config(format!("failed to build HTTP client: {e}")))?;
        let endpoint = format!("{}/chat/completions", options.base_url.trim_end_matches('/'));
        Ok(Self {
            http,
            endpoint,
            options,
        })
    }

    pub fn model(&self) -> &str {
        &self.options.model
    }

    fn transport_error(&self, e: reqwest::Error) -> PencraftError {
        if e.is_timeout() {
            PencraftError::Timeout {
                capability: Capability::Completion,
                after: Duration::from_secs(self.options.timeout_secs),
            }
        } else {
            PencraftError::unavailable(Capability::Completion, format!("{}: {e}", self.endpoint))
        }
    }
}

#[async_trait]
impl Completion for ChatClient {
    #[instrument(skip_all, fields(model = %self.options.model, prompt_len = request.prompt.len()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.options.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut builder = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.options.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PencraftError::parse(format!("invalid completion response: {e}")))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                tokens_in = usage.prompt_tokens,
                tokens_out = usage.completion_tokens,
                "completion usage"
            );
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PencraftError::parse("completion response has no choices"))?;
        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(PencraftError::parse(format!(
                "empty completion (finish_reason: {})",
                choice.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(content)
    }
}

/// Throttling and server errors are transient; other statuses are not.
fn status_error(status: StatusCode, body: &str) -> PencraftError {
    let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    let message = format!("HTTP {status}: {snippet}");
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        PencraftError::unavailable(Capability::Completion, message)
    } else {
        PencraftError::config(format!("completion endpoint rejected the request: {message}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, api_key: Option<&str>) -> ChatClient {
        ChatClient::new(ChatOptions {
            base_url: format!("{}/v1/", server.uri()),
            model: "test-model".into(),
            api_key: api_key.map(str::to_string),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt.into(),
            max_tokens: 256,
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "max_tokens": 256,
                "messages": [{"role": "user", "content": "Write a haiku"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Silent crab"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("secret"));
        let text = client.complete(&request("Write a haiku")).await.unwrap();
        assert_eq!(text, "Silent crab");
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client_for(&server, None)
            .complete(&request("x"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn unauthorized_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client_for(&server, None)
            .complete(&request("x"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(err, PencraftError::Config { .. }));
    }

    #[tokio::test]
    async fn empty_content_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "  "}, "finish_reason": "length"}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server, None)
            .complete(&request("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PencraftError::Parse { .. }));
        assert!(err.to_string().contains("length"));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"choices": []}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = ChatClient::new(ChatOptions {
            base_url: server.uri(),
            model: "m".into(),
            api_key: None,
            timeout_secs: 1,
        })
        .unwrap();
        let err = client.complete(&request("x")).await.unwrap_err();
        assert!(matches!(err, PencraftError::Timeout { .. }));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let client = ChatClient::new(ChatOptions {
            base_url: "http://localhost:3030/v1/".into(),
            model: "m".into(),
            api_key: None,
            timeout_secs: 1,
        })
        .unwrap();
        assert_eq!(client.endpoint, "http://localhost:3030/v1/chat/completions");
    }
}
