//! Completion providers.
//!
//! Both supported providers expose the same single capability through the
//! [`Complete`] trait: send a system prompt and a user prompt, get text
//! back. Failures are classified into [`AiError`] variants at this layer
//! so the retry loop upstream never inspects HTTP details.
//!
//! The concrete provider is a closed enum chosen once from validated
//! configuration; nothing in the pipeline dispatches on provider name
//! strings at runtime.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AiConfig, ProviderKind};
use crate::error::{AiError, HarvestError, Result};

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One completion call, provider-agnostic.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// The single capability every provider must satisfy.
#[async_trait]
pub trait Complete: Send + Sync {
    fn name(&self) -> &str;

    /// Run one completion. Errors are already classified; callers decide
    /// retry behavior from [`AiError::is_retryable`].
    async fn complete(&self, request: &CompletionRequest)
        -> std::result::Result<String, AiError>;
}

/// Map an HTTP status and response body onto the provider error taxonomy.
///
/// Both providers use compatible status conventions, so one classifier
/// serves both.
fn classify_response(status: reqwest::StatusCode, body: &str) -> AiError {
    let summary = crate::utils::truncate_for_log(body, 300);
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        AiError::Auth(format!("HTTP {status}: {summary}"))
    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        AiError::RateLimit(format!("HTTP {status}: {summary}"))
    } else if status.is_server_error() {
        AiError::Transient(format!("HTTP {status}: {summary}"))
    } else if body.contains("content_policy")
        || body.contains("content_filter")
        || body.contains("content filtering")
    {
        AiError::ContentPolicy(format!("HTTP {status}: {summary}"))
    } else {
        AiError::Transient(format!("HTTP {status}: {summary}"))
    }
}

fn transport_error(e: reqwest::Error) -> AiError {
    AiError::Transient(format!("transport failure: {e}"))
}

// --- OpenAI ---

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

/// OpenAI chat-completions client.
pub struct OpenAiProvider {
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            endpoint: OPENAI_ENDPOINT.to_string(),
        }
    }
}

#[async_trait]
impl Complete for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, AiError> {
        let body = OpenAiRequest {
            model: &request.model,
            messages: vec![
                OpenAiMessage {
                    role: "system",
                    content: &request.system,
                },
                OpenAiMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_response(status, &text));
        }

        let parsed: OpenAiResponse = serde_json::from_str(&text)
            .map_err(|e| AiError::Malformed(format!("cannot parse response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AiError::Malformed("response contained no completion".to_string()))
    }
}

// --- Anthropic ---

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic messages-API client.
pub struct AnthropicProvider {
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
}

impl fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            endpoint: ANTHROPIC_ENDPOINT.to_string(),
        }
    }
}

#[async_trait]
impl Complete for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, AiError> {
        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &request.user,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_response(status, &text));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&text)
            .map_err(|e| AiError::Malformed(format!("cannot parse response: {e}")))?;
        parsed
            .content
            .into_iter()
            .find_map(|block| block.text)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AiError::Malformed("response contained no text block".to_string()))
    }
}

// --- Closed provider set ---

/// The configured provider, chosen once at startup.
#[derive(Debug)]
pub enum Provider {
    OpenAi(OpenAiProvider),
    Anthropic(AnthropicProvider),
}

impl Provider {
    /// Build the provider named by the configuration, reading its
    /// credential from the environment. A missing credential is a fatal
    /// configuration error raised before any network activity.
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let env_var = config.provider.env_var();
        let api_key = std::env::var(env_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                HarvestError::config(format!(
                    "provider '{}' selected but {env_var} is not set",
                    config.provider
                ))
            })?;

        Ok(match config.provider {
            ProviderKind::OpenAi => Provider::OpenAi(OpenAiProvider::new(api_key)),
            ProviderKind::Anthropic => Provider::Anthropic(AnthropicProvider::new(api_key)),
        })
    }
}

#[async_trait]
impl Complete for Provider {
    fn name(&self) -> &str {
        match self {
            Provider::OpenAi(p) => p.name(),
            Provider::Anthropic(p) => p.name(),
        }
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, AiError> {
        match self {
            Provider::OpenAi(p) => p.complete(request).await,
            Provider::Anthropic(p) => p.complete(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_classify_auth() {
        assert!(matches!(
            classify_response(StatusCode::UNAUTHORIZED, "bad key"),
            AiError::Auth(_)
        ));
        assert!(matches!(
            classify_response(StatusCode::FORBIDDEN, "no access"),
            AiError::Auth(_)
        ));
    }

    #[test]
    fn test_classify_rate_limit() {
        assert!(matches!(
            classify_response(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            AiError::RateLimit(_)
        ));
    }

    #[test]
    fn test_classify_server_errors_as_transient() {
        assert!(matches!(
            classify_response(StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            AiError::Transient(_)
        ));
        assert!(matches!(
            classify_response(StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
            AiError::Transient(_)
        ));
    }

    #[test]
    fn test_classify_content_policy() {
        let body = r#"{"error": {"code": "content_policy_violation"}}"#;
        assert!(matches!(
            classify_response(StatusCode::BAD_REQUEST, body),
            AiError::ContentPolicy(_)
        ));
    }

    #[test]
    fn test_classify_other_client_errors_as_transient() {
        assert!(matches!(
            classify_response(StatusCode::BAD_REQUEST, "invalid model"),
            AiError::Transient(_)
        ));
    }

    #[test]
    fn test_openai_request_shape() {
        let body = OpenAiRequest {
            model: "gpt-4o",
            messages: vec![
                OpenAiMessage {
                    role: "system",
                    content: "be brief",
                },
                OpenAiMessage {
                    role: "user",
                    content: "hello",
                },
            ],
            temperature: 0.7,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_anthropic_request_shape() {
        let body = AnthropicRequest {
            model: "claude-3-5-sonnet-20241022",
            max_tokens: 4096,
            temperature: 0.3,
            system: "translate",
            messages: vec![AnthropicMessage {
                role: "user",
                content: "bonjour",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_tokens"], 4096);
        assert_eq!(json["system"], "translate");
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_openai_response_parsing() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": " text "}}]}"#;
        let parsed: OpenAiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some(" text ")
        );
    }

    #[test]
    fn test_anthropic_response_parsing() {
        let raw = r#"{"content": [{"type": "text", "text": "回复"}]}"#;
        let parsed: AnthropicResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content[0].text.as_deref(), Some("回复"));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let provider = OpenAiProvider::new("sk-secret".to_string());
        let debugged = format!("{provider:?}");
        assert!(!debugged.contains("sk-secret"));
        assert!(debugged.contains("<redacted>"));

        let provider = AnthropicProvider::new("sk-ant-secret".to_string());
        let debugged = format!("{provider:?}");
        assert!(!debugged.contains("sk-ant-secret"));
    }
}
