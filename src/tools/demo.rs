//! A handful of concrete, non-reasoning tools carried over in spirit for the
//! demo binary and tests. `WebSearchStubTool` stands in for the out-of-scope
//! real web-search backend; `TimeTool`'s `{timezone}` shape matches the
//! sniffer's own name-inference mapping.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Tool, ToolResult};
use crate::llm::ChatMessage;
use crate::Result;

/// Echoes its input back — useful as the simplest possible tool-call fixture
/// in tests.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"],
        })
    }

    async fn execute(&self, args: Value, _history: &[ChatMessage], _session_id: i64) -> Result<ToolResult> {
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
        Ok(ToolResult::ok(json!({ "text": text })))
    }
}

#[derive(Debug, Deserialize)]
struct TimeArgs {
    #[serde(default)]
    timezone: Option<String>,
}

/// Returns the current time. Only UTC is actually supported; any other
/// `timezone` value is reported back with the UTC answer and a `note`
/// explaining the limitation (no timezone database is bundled).
pub struct TimeTool;

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time, optionally in a named timezone."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "timezone": { "type": "string", "description": "IANA timezone name, e.g. UTC" } },
        })
    }

    async fn execute(&self, args: Value, _history: &[ChatMessage], _session_id: i64) -> Result<ToolResult> {
        let parsed: TimeArgs = serde_json::from_value(args).unwrap_or(TimeArgs { timezone: None });
        let formatted = format!("{} UTC", Utc::now().format("%Y-%m-%d %H:%M:%S"));

        let mut result = ToolResult::ok(json!({ "formatted": formatted }));
        if let Some(tz) = parsed.timezone {
            if !tz.eq_ignore_ascii_case("utc") {
                result.note = Some(format!("only UTC is supported; returning UTC time instead of {tz}"));
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct WebSearchArgs {
    query: String,
}

/// Stands in for a real web-search backend, which lives outside this crate
/// as an external collaborator.
pub struct WebSearchStubTool;

#[async_trait]
impl Tool for WebSearchStubTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for a query. (Stub: not wired to a live backend.)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
        })
    }

    async fn execute(&self, args: Value, _history: &[ChatMessage], _session_id: i64) -> Result<ToolResult> {
        let parsed: WebSearchArgs = serde_json::from_value(args)
            .map_err(|e| crate::Error::InvalidInput(format!("invalid web_search arguments: {e}")))?;
        Ok(ToolResult::err(format!(
            "web search is not available in this deployment (query: {})",
            parsed.query
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn time_tool_reports_utc() {
        let tool = TimeTool;
        let result = tool.execute(json!({"timezone": "UTC"}), &[], 1).await.unwrap();
        assert!(result.success);
        assert!(result.content["formatted"].as_str().unwrap().ends_with("UTC"));
        assert!(result.note.is_none());
    }

    #[tokio::test]
    async fn time_tool_notes_unsupported_timezone() {
        let tool = TimeTool;
        let result = tool.execute(json!({"timezone": "America/New_York"}), &[], 1).await.unwrap();
        assert!(result.note.is_some());
    }

    #[tokio::test]
    async fn web_search_stub_reports_failure() {
        let tool = WebSearchStubTool;
        let result = tool.execute(json!({"query": "rust async"}), &[], 1).await.unwrap();
        assert!(!result.success);
    }
}
