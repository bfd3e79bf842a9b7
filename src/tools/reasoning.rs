//! The `reasoning` tool: the one tool the loop inspects structurally. Planning is the model's job — this tool is a thin passthrough that
//! echoes back the caller-supplied `ready_to_reply` flag so the loop can
//! toggle its reply guard.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Tool, ToolResult};
use crate::llm::ChatMessage;
use crate::Result;

#[derive(Debug, Deserialize)]
struct ReasoningArgs {
    #[serde(default)]
    thinking_focus: Option<String>,
    #[serde(default)]
    specific_question: Option<String>,
    ready_to_reply: bool,
}

pub struct ReasoningTool;

#[async_trait]
impl Tool for ReasoningTool {
    fn name(&self) -> &str {
        "reasoning"
    }

    fn description(&self) -> &str {
        "Record the current plan and whether enough information has been gathered to give a final answer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "thinking_focus": { "type": "string", "description": "What you are currently focused on figuring out." },
                "specific_question": { "type": "string", "description": "The specific question this step is meant to answer." },
                "ready_to_reply": { "type": "boolean", "description": "Whether the conversation has enough information for a final answer." },
            },
            "required": ["ready_to_reply"],
        })
    }

    async fn execute(&self, args: Value, _history: &[ChatMessage], _session_id: i64) -> Result<ToolResult> {
        let parsed: ReasoningArgs = serde_json::from_value(args)
            .map_err(|e| crate::Error::InvalidInput(format!("invalid reasoning arguments: {e}")))?;

        Ok(ToolResult::ok(json!({
            "ready_to_reply": parsed.ready_to_reply,
            "thinking_focus": parsed.thinking_focus,
            "specific_question": parsed.specific_question,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_ready_to_reply_back() {
        let tool = ReasoningTool;
        let result = tool
            .execute(json!({"ready_to_reply": false, "thinking_focus": "gathering data"}), &[], 1)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.content["ready_to_reply"], false);
    }
}
