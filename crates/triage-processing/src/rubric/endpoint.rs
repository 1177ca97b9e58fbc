//! OpenAI-compatible chat endpoint provider.
//!
//! Configured entirely from the environment: `MODEL_ENDPOINT` is the full
//! chat-completions URL and `MODEL_KEY` the bearer token. Neither has a
//! default; outside development mode startup fails fast when they are
//! absent. Structured-output enforcement is requested as JSON mode; when
//! the deployment rejects it the prompt-embedded schema still applies.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::debug;

use super::provider::{CompletionRequest, LlmProvider};
use crate::error::{ProcessingError, Result, TransportError};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Environment variable carrying the chat-completions URL.
pub const MODEL_ENDPOINT_VAR: &str = "MODEL_ENDPOINT";
/// Environment variable carrying the bearer token.
pub const MODEL_KEY_VAR: &str = "MODEL_KEY";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    seed: u64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: std::borrow::Cow<'a, str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<Choice>>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<OwnedMessage>,
}

#[derive(Debug, Deserialize)]
struct OwnedMessage {
    content: Option<String>,
}

/// Configuration for the endpoint provider.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Chat-completions URL (from `MODEL_ENDPOINT`).
    pub endpoint: String,
    /// Model identifier sent in the request body.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Whether to request JSON mode (negotiated at init; disabled when the
    /// deployment rejects `response_format`).
    pub json_mode: bool,
}

/// Provider for any OpenAI-compatible chat-completions deployment.
#[derive(Debug)]
pub struct EndpointProvider {
    api_key: String,
    config: EndpointConfig,
    client: Client,
}

impl EndpointProvider {
    /// Construct from the environment. Fails fast when `MODEL_ENDPOINT` or
    /// `MODEL_KEY` is absent.
    ///
    /// The client handle is a pure constructor over the environment: no
    /// other module-level state exists.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let endpoint = env::var(MODEL_ENDPOINT_VAR)
            .map_err(|_| ProcessingError::MissingEnv(MODEL_ENDPOINT_VAR.to_string()))?;
        let api_key = env::var(MODEL_KEY_VAR)
            .map_err(|_| ProcessingError::MissingEnv(MODEL_KEY_VAR.to_string()))?;

        Self::new(endpoint, api_key, model.into())
    }

    /// Construct with explicit endpoint and key (used by tests and the
    /// smoke-test path).
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let config = EndpointConfig {
            endpoint: endpoint.into(),
            model: model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            json_mode: true,
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProcessingError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            config,
            client,
        })
    }

    /// Disable JSON mode for deployments that reject `response_format`.
    pub fn without_json_mode(mut self) -> Self {
        self.config.json_mode = false;
        self
    }

    fn classify_status(status: u16) -> TransportError {
        match status {
            429 => TransportError::RateLimited,
            500..=599 => TransportError::Server(status),
            _ => TransportError::Rejected(status),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for EndpointProvider {
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, TransportError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                Message {
                    role: "system",
                    content: request.system.as_str().into(),
                },
                Message {
                    role: "user",
                    content: request.user.as_str().into(),
                },
            ],
            temperature: 0.0,
            seed: request.seed,
            max_tokens: request.max_tokens,
            response_format: self
                .config
                .json_mode
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "endpoint returned non-success");
            return Err(Self::classify_status(status.as_u16()));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Connection(format!("malformed response body: {e}")))?;

        parsed
            .choices
            .and_then(|mut choices| choices.pop())
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| TransportError::Connection("empty completion".to_string()))
    }

    fn name(&self) -> &str {
        "endpoint"
    }

    fn model_version(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_fails_fast_without_vars() {
        // Serialize access to the process environment.
        unsafe {
            env::remove_var(MODEL_ENDPOINT_VAR);
            env::remove_var(MODEL_KEY_VAR);
        }
        let err = EndpointProvider::from_env("gpt-4o-mini").unwrap_err();
        assert!(matches!(err, ProcessingError::MissingEnv(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            EndpointProvider::classify_status(429),
            TransportError::RateLimited
        );
        assert_eq!(
            EndpointProvider::classify_status(503),
            TransportError::Server(503)
        );
        assert_eq!(
            EndpointProvider::classify_status(401),
            TransportError::Rejected(401)
        );
    }

    #[test]
    fn test_request_body_pins_sampling() {
        let body = ChatRequest {
            model: "m",
            messages: vec![],
            temperature: 0.0,
            seed: 2025,
            max_tokens: 200,
            response_format: Some(ResponseFormat { kind: "json_object" }),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"temperature\":0"));
        assert!(json.contains("\"seed\":2025"));
        assert!(json.contains("\"max_tokens\":200"));
        assert!(json.contains("json_object"));
    }

    #[test]
    fn test_parse_chat_response_shapes() {
        let json = r#"{"choices": [{"message": {"content": "{\"score\": 3}"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        let content = parsed
            .choices
            .unwrap()
            .pop()
            .unwrap()
            .message
            .unwrap()
            .content
            .unwrap();
        assert!(content.contains("score"));

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": null}"#).unwrap();
        assert!(empty.choices.is_none());
    }
}
