//! Wire-shaped events the loop emits. Every variant serializes with a
//! `type` discriminator plus a `timestamp` (Unix seconds), matching the SSE
//! frame shape `data: <json>\n\n` directly.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

/// One event in the lazy sequence an `AgentLoop` run produces.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Status { status: String, message: String, timestamp: i64 },
    Thinking { message: String, timestamp: i64 },
    ContentStart { message: String, guarded: bool, timestamp: i64 },
    ContentDelta { delta: String, guarded: bool, timestamp: i64 },
    ContentDone { guarded: bool, timestamp: i64 },
    ToolCall { tool_call_id: String, tool_name: String, tool_input: Value, timestamp: i64 },
    ToolExecuting { tool_call_id: String, tool_name: String, message: String, timestamp: i64 },
    ToolResult { tool_call_id: String, tool_name: String, tool_output: Value, success: bool, timestamp: i64 },
    IterationInfo { current_iteration: u32, max_iterations: u32, message: String, timestamp: i64 },
    Retry { reason: RetryReason, retry_count: u32, max_retries: u32, message: String, timestamp: i64 },
    Error { error_code: ErrorCode, error_message: String, #[serde(skip_serializing_if = "Option::is_none")] details: Option<Value>, timestamp: i64 },
    Done { message_id: i64, session_id: i64, total_iterations: u32, total_time_ms: i64, timestamp: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    MultipleToolsCalled,
    TextualToolCall,
    EmptyContent,
    EmptyFinishReason,
}

/// Fatal error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MultipleToolsMaxRetries,
    TextualToolCallMaxRetries,
    EmptyResponseMaxRetries,
    UnexpectedFinishReason,
    MaxIterationsReached,
    InternalError,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

impl AgentEvent {
    pub fn status(status: impl Into<String>, message: impl Into<String>) -> Self {
        AgentEvent::Status { status: status.into(), message: message.into(), timestamp: now() }
    }

    pub fn thinking(message: impl Into<String>) -> Self {
        AgentEvent::Thinking { message: message.into(), timestamp: now() }
    }

    pub fn content_start(message: impl Into<String>, guarded: bool) -> Self {
        AgentEvent::ContentStart { message: message.into(), guarded, timestamp: now() }
    }

    pub fn content_delta(delta: impl Into<String>, guarded: bool) -> Self {
        AgentEvent::ContentDelta { delta: delta.into(), guarded, timestamp: now() }
    }

    pub fn content_done() -> Self {
        AgentEvent::ContentDone { guarded: false, timestamp: now() }
    }

    pub fn tool_call(tool_call_id: impl Into<String>, tool_name: impl Into<String>, tool_input: Value) -> Self {
        AgentEvent::ToolCall { tool_call_id: tool_call_id.into(), tool_name: tool_name.into(), tool_input, timestamp: now() }
    }

    pub fn tool_executing(tool_call_id: impl Into<String>, tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        AgentEvent::ToolExecuting {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            message: message.into(),
            timestamp: now(),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, tool_name: impl Into<String>, tool_output: Value, success: bool) -> Self {
        AgentEvent::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            tool_output,
            success,
            timestamp: now(),
        }
    }

    pub fn iteration_info(current_iteration: u32, max_iterations: u32, message: impl Into<String>) -> Self {
        AgentEvent::IterationInfo { current_iteration, max_iterations, message: message.into(), timestamp: now() }
    }

    pub fn retry(reason: RetryReason, retry_count: u32, max_retries: u32, message: impl Into<String>) -> Self {
        AgentEvent::Retry { reason, retry_count, max_retries, message: message.into(), timestamp: now() }
    }

    pub fn error(error_code: ErrorCode, error_message: impl Into<String>) -> Self {
        AgentEvent::Error { error_code, error_message: error_message.into(), details: None, timestamp: now() }
    }

    pub fn done(message_id: i64, session_id: i64, total_iterations: u32, total_time_ms: i64) -> Self {
        AgentEvent::Done { message_id, session_id, total_iterations, total_time_ms, timestamp: now() }
    }

    /// Terminal events close the stream: exactly one of `done`/`error` ends
    /// every run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done { .. } | AgentEvent::Error { .. })
    }
}
