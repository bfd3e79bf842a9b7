//! Streaming OpenRouter client.
//!
//! Request construction and rate-limit tracking follow the non-streaming
//! client this was extended from; the SSE consumption loop itself follows
//! the `eventsource_stream` + `async_stream::stream!` pattern used for
//! OpenAI-compatible chat completions.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use eventsource_stream::Eventsource;
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{ChatMessage, FinishReason, LLMClient, StreamDelta, ToolChoice, ToolDefinition};
use crate::error::{Error, Result};

/// Configuration for `OpenRouterClient`.
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: SecretString,
    pub default_model: String,
    pub site_url: Option<String>,
    pub site_name: Option<String>,
    pub base_url: String,
}

impl OpenRouterConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| Error::Config("OPENROUTER_API_KEY is not set".to_string()))?;
        Ok(OpenRouterConfig {
            api_key: SecretString::from(api_key),
            default_model: std::env::var("OPENROUTER_DEFAULT_MODEL")
                .unwrap_or_else(|_| "openrouter/auto".to_string()),
            site_url: std::env::var("OPENROUTER_SITE_URL").ok(),
            site_name: std::env::var("OPENROUTER_SITE_NAME").ok(),
            base_url: std::env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct ChunkChoice {
    delta: MessageDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct MessageDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, serde::Deserialize)]
struct ToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Rate limit tracking, updated from response headers on every call.
#[derive(Debug, Default)]
struct RateLimitState {
    remaining: Option<u32>,
    reset_at: Option<u64>,
}

/// A streaming OpenRouter/OpenAI-compatible chat completion client.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    config: OpenRouterConfig,
    rate_limit: Arc<RwLock<RateLimitState>>,
}

impl OpenRouterClient {
    pub fn new(config: OpenRouterConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();

        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", config.api_key.expose_secret()))
                .map_err(|e| Error::Config(format!("Invalid API key format: {e}")))?,
        );

        if let Some(ref site_url) = config.site_url {
            if let Ok(value) = header::HeaderValue::from_str(site_url) {
                headers.insert("HTTP-Referer", value);
            }
        }
        if let Some(ref site_name) = config.site_name {
            if let Ok(value) = header::HeaderValue::from_str(site_name) {
                headers.insert("X-Title", value);
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(OpenRouterClient {
            client,
            config,
            rate_limit: Arc::new(RwLock::new(RateLimitState::default())),
        })
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    async fn update_rate_limit(&self, response: &reqwest::Response) {
        let mut state = self.rate_limit.write().await;
        if let Some(remaining) = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
        {
            state.remaining = Some(remaining);
        }
        if let Some(reset) = response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
        {
            state.reset_at = Some(reset);
        }
    }
}

#[async_trait]
impl LLMClient for OpenRouterClient {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
        tool_choice: Option<ToolChoice>,
        model: &str,
    ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            stream: true,
            tools: if tools.is_empty() { None } else { Some(tools) },
            tool_choice,
        };

        debug!(model, "issuing streaming chat completion");

        let response = self.client.post(&url).json(&request).send().await?;
        self.update_rate_limit(&response).await;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 429 {
                warn!("rate limit exceeded: {error_text}");
                Error::RateLimit(error_text)
            } else if status.as_u16() == 401 {
                Error::Unauthorized("invalid API key".to_string())
            } else {
                Error::Llm(format!("API error ({status}): {error_text}"))
            });
        }

        let event_stream = response.bytes_stream().eventsource();

        let output = async_stream::stream! {
            futures::pin_mut!(event_stream);

            while let Some(event_result) = event_stream.next().await {
                let event = match event_result {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(Error::Llm(format!("stream error: {e}")));
                        break;
                    }
                };

                if event.data == "[DONE]" {
                    break;
                }

                let chunk: ChatCompletionChunk = match serde_json::from_str(&event.data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(Error::Llm(format!("failed to parse chunk: {e}")));
                        break;
                    }
                };

                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            yield Ok(StreamDelta::Content(content));
                        }
                    }

                    if let Some(tool_calls) = choice.delta.tool_calls {
                        for tc in tool_calls {
                            yield Ok(StreamDelta::ToolCallDelta {
                                index: tc.index,
                                id: tc.id,
                                name: tc.function.as_ref().and_then(|f| f.name.clone()),
                                arguments_delta: tc.function.and_then(|f| f.arguments),
                            });
                        }
                    }

                    if let Some(reason) = choice.finish_reason {
                        yield Ok(StreamDelta::Finish(FinishReason::from_wire(&reason)));
                    }
                }
            }
        };

        Ok(Box::pin(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OpenRouterConfig {
        OpenRouterConfig {
            api_key: SecretString::from("test-key"),
            default_model: "anthropic/claude-3.5-sonnet".to_string(),
            site_url: None,
            site_name: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
        }
    }

    #[test]
    fn client_creation_succeeds() {
        let client = OpenRouterClient::new(test_config());
        assert!(client.is_ok());
    }

    #[test]
    fn default_model_is_config_value() {
        let client = OpenRouterClient::new(test_config()).unwrap();
        assert_eq!(client.default_model(), "anthropic/claude-3.5-sonnet");
    }
}
