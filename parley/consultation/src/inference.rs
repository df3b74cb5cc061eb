use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{config::InferenceConfig, error::InferenceError};

/// Text-generation backend consulted by specialists, synthesis and the final reply.
#[async_trait]
pub trait TextInferenceClient: Send + Sync {
    /// Generates a completion for `prompt`, giving up after `timeout`.
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, InferenceError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize, Default)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    response: Option<String>,
}

impl CompletionBody {
    fn into_text(self) -> Option<String> {
        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .or_else(|| self.message.and_then(|message| message.content))
            .or(self.response)?;
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Client for OpenAI-compatible chat completion endpoints.
///
/// Also understands the `{"message": {"content": ..}}` and `{"response": ..}` bodies
/// returned by Ollama-style servers.
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl HttpInferenceClient {
    /// Creates a client for `endpoint` using `model`.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .build()
            .map_err(|err| InferenceError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 1024,
        })
    }

    /// Builds a client from configuration, reading the key from the configured variable.
    pub fn from_config(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let mut client = Self::new(&config.endpoint, &config.model)?.with_temperature(config.temperature);
        client.max_tokens = config.max_tokens;
        if let Ok(key) = env::var(&config.api_key_env) {
            if !key.trim().is_empty() {
                client = client.with_api_key(key);
            }
        }
        Ok(client)
    }

    /// Sends the key as a bearer token.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Endpoint receiving completion requests.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn transport(err: &reqwest::Error, timeout: Duration) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout {
            elapsed_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        InferenceError::Transport(err.to_string())
    }
}

#[async_trait]
impl TextInferenceClient for HttpInferenceClient {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, InferenceError> {
        let payload = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let mut req = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| transport(&err, timeout))?;
        let body: CompletionBody = response
            .json()
            .await
            .map_err(|err| transport(&err, timeout))?;
        body.into_text().ok_or(InferenceError::EmptyCompletion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Option<String> {
        serde_json::from_str::<CompletionBody>(raw)
            .unwrap()
            .into_text()
    }

    #[test]
    fn reads_chat_completion_shape() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"Try the rail trail."}}]}"#;
        assert_eq!(parse(raw).as_deref(), Some("Try the rail trail."));
    }

    #[test]
    fn reads_ollama_shapes() {
        assert_eq!(
            parse(r#"{"message":{"content":"chat"}}"#).as_deref(),
            Some("chat")
        );
        assert_eq!(
            parse(r#"{"response":"generate"}"#).as_deref(),
            Some("generate")
        );
    }

    #[test]
    fn blank_completion_is_none() {
        assert!(parse(r#"{"choices":[{"message":{"content":"   "}}]}"#).is_none());
        assert!(parse(r"{}").is_none());
    }

    #[test]
    fn config_sets_endpoint() {
        let config = InferenceConfig {
            endpoint: "http://127.0.0.1:11434/v1/chat/completions".into(),
            api_key_env: "PARLEY_TEST_KEY_THAT_IS_NOT_SET".into(),
            ..InferenceConfig::default()
        };
        let client = HttpInferenceClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint(), config.endpoint);
        assert!(client.api_key.is_none());
    }
}
