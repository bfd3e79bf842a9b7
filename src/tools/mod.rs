//! Tool contract and registry.

mod demo;
mod reasoning;

pub use demo::{EchoTool, TimeTool, WebSearchStubTool};
pub use reasoning::ReasoningTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::llm::{ChatMessage, FunctionDefinition, ToolDefinition};
use crate::model::ContentBlock;
use crate::Result;

/// Executed as `(input, history, session_id) -> result`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, history: &[ChatMessage], session_id: i64) -> Result<ToolResult>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.parameters_schema(),
            },
        }
    }
}

/// The result of a tool execution. `content` is always JSON-serializable;
/// `image_blocks`/`file_id` drive the loop's content-hoist and artifact-hoist
/// behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_blocks: Option<Vec<ContentBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ToolResult {
    pub fn ok(content: Value) -> Self {
        ToolResult { success: true, content, image_blocks: None, file_id: None, page_count: None, note: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            content: serde_json::json!({ "error": message.into() }),
            image_blocks: None,
            file_id: None,
            page_count: None,
            note: None,
        }
    }

    /// Serialize to the JSON object form a tool message's `tool_output`
    /// stores, with `success` folded in.
    pub fn to_output_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A fully-assembled tool call the loop is about to dispatch.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Name → executor registry.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    /// Tools that perform blocking/network-heavy I/O (browse,
    /// download-and-convert); the loop runs these via `tokio::spawn` so the
    /// event-producing task is never blocked on them. No such tool ships
    /// here, but a registrant can mark itself as one.
    io_heavy: HashSet<String>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry { tools: HashMap::new(), io_heavy: HashSet::new() }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    /// Register a tool and mark it as I/O-heavy.
    pub fn register_io_heavy<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.register(tool);
        self.io_heavy.insert(name);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn is_io_heavy(&self, name: &str) -> bool {
        self.io_heavy.contains(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call, honoring the I/O-heavy offload policy.
    pub async fn execute(&self, call: &ToolCall, history: &[ChatMessage], session_id: i64) -> Result<ToolResult> {
        let Some(tool) = self.get(&call.name) else {
            return Ok(ToolResult::err(format!("Unknown tool: {}", call.name)));
        };

        let args = call.arguments.clone();
        match tool.execute(args, history, session_id).await {
            Ok(result) => Ok(result),
            Err(e) => Ok(ToolResult::err(e.to_string())),
        }
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_ok_and_err() {
        let ok = ToolResult::ok(serde_json::json!({"formatted": "now"}));
        assert!(ok.success);

        let err = ToolResult::err("boom");
        assert!(!err.success);
        assert_eq!(err.content["error"], "boom");
    }

    #[tokio::test]
    async fn unknown_tool_is_non_fatal_failure() {
        let registry = ToolRegistry::new();
        let call = ToolCall { id: "1".into(), name: "nope".into(), arguments: serde_json::json!({}) };
        let result = registry.execute(&call, &[], 1).await.unwrap();
        assert!(!result.success);
    }
}
