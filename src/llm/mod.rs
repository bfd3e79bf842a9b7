//! LLM client contract: chat message wire shapes, streaming deltas, and the
//! `LLMClient` trait the agent loop drives.

mod client;

pub use client::{OpenRouterClient, OpenRouterConfig};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Role of a chat message, reused verbatim from the OpenAI/OpenRouter wire
/// protocol the function-calling contract is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message as sent to (or echoed by) the LLM provider. `content` is a
/// permissive JSON value so both plain strings and typed-block arrays
/// (`history::load_history_for_replay`'s output) serialize the same way the
/// wire protocol expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<AssistantToolCall>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        ChatMessage {
            role: ChatRole::System,
            content: Some(Value::String(text.into())),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: Value) -> Self {
        ChatMessage { role: ChatRole::User, content: Some(content), tool_call_id: None, tool_calls: None }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        ChatMessage {
            role: ChatRole::Assistant,
            content: Some(Value::String(text.into())),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<AssistantToolCall>) -> Self {
        ChatMessage { role: ChatRole::Assistant, content: None, tool_call_id: None, tool_calls: Some(tool_calls) }
    }

    pub fn assistant_blocks(blocks: Value) -> Self {
        ChatMessage { role: ChatRole::Assistant, content: Some(blocks), tool_call_id: None, tool_calls: None }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: Value) -> Self {
        ChatMessage {
            role: ChatRole::Tool,
            content: Some(content),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

/// A fully-assembled tool call recorded on an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A tool schema advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A forced tool-choice request, used when the loop sets
/// `force_reasoning_next`. Untagged so it serializes as the API expects:
/// `"auto"` or `{"type":"function","function":{"name":...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Auto(String),
    Specific {
        #[serde(rename = "type")]
        tool_type: String,
        function: FunctionName,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionName {
    pub name: String,
}

impl ToolChoice {
    pub fn auto() -> Self {
        ToolChoice::Auto("auto".to_string())
    }

    pub fn function(name: impl Into<String>) -> Self {
        ToolChoice::Specific {
            tool_type: "function".to_string(),
            function: FunctionName { name: name.into() },
        }
    }
}

/// A single fragment yielded while consuming a streamed chat completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// A content-channel text fragment.
    Content(String),
    /// An indexed, partial tool-call fragment; fields arrive incrementally
    /// and are assembled by index (see `agent::loop_::ToolCallAccumulator`).
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: Option<String>,
    },
    /// The terminal event for the stream.
    Finish(FinishReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "stop" => FinishReason::Stop,
            "tool_calls" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// A streaming chat-completion client with function-call support.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
        tool_choice: Option<ToolChoice>,
        model: &str,
    ) -> Result<BoxStream<'static, Result<StreamDelta>>>;
}

/// A test double that replays a canned sequence of deltas per call,
/// regardless of the messages it's given. Used for the byte-for-byte replay
/// property (recorded deltas reproduce the same event sequence).
pub struct StubLlmClient {
    scripts: tokio::sync::Mutex<std::collections::VecDeque<Vec<StreamDelta>>>,
}

impl StubLlmClient {
    /// `scripts` is consumed in order, one script per call to `stream`; the
    /// last script repeats if `stream` is called more times than scripts
    /// were provided.
    pub fn new(scripts: Vec<Vec<StreamDelta>>) -> Self {
        StubLlmClient { scripts: tokio::sync::Mutex::new(scripts.into()) }
    }
}

#[async_trait]
impl LLMClient for StubLlmClient {
    async fn stream(
        &self,
        _messages: Vec<ChatMessage>,
        _tools: Vec<ToolDefinition>,
        _tool_choice: Option<ToolChoice>,
        _model: &str,
    ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
        let mut scripts = self.scripts.lock().await;
        let script = if scripts.len() > 1 {
            scripts.pop_front().unwrap()
        } else {
            scripts.front().cloned().unwrap_or_default()
        };
        let iter = script.into_iter().map(Ok);
        Ok(Box::pin(futures::stream::iter(iter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn stub_client_replays_scripted_deltas() {
        let client = StubLlmClient::new(vec![vec![
            StreamDelta::Content("he".into()),
            StreamDelta::Content("llo".into()),
            StreamDelta::Finish(FinishReason::Stop),
        ]]);
        let mut stream = client.stream(vec![], vec![], None, "any-model").await.unwrap();
        let mut out = vec![];
        while let Some(delta) = stream.next().await {
            out.push(delta.unwrap());
        }
        assert_eq!(out.len(), 3);
    }
}
