//! Conversation data model: messages, sessions, and the typed content blocks
//! that flow between the history store and the LLM-chat wire shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Tool name used for artifact-hoist assistant messages.
pub const ARTIFACT_TOOL_NAME: &str = "__assistant_artifact__";

/// An ordered, persisted record in a session.
///
/// `sequence` is assigned at write time by the owning `HistoryStore` as
/// `max(existing)+1`; callers never set it themselves except when replaying
/// fixtures in tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub sequence: i64,
    pub role: Role,
    /// Raw stored content. Encoding depends on `role`/`tool_name` — see
    /// the typed helpers on this struct and `history::load_history_for_replay`.
    pub content: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_output: Option<Value>,
    pub model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A user turn, content already encoded as the typed-block JSON array.
    pub fn user(sequence: i64, content_blocks: &[ContentBlock]) -> Result<Self, serde_json::Error> {
        Ok(Message {
            sequence,
            role: Role::User,
            content: Some(serde_json::to_string(content_blocks)?),
            tool_call_id: None,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            model_id: None,
            created_at: Utc::now(),
        })
    }

    /// The assistant half of a tool-call pair (no content, `tool_call_id` set).
    pub fn assistant_tool_call(
        sequence: i64,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_input: Value,
    ) -> Self {
        Message {
            sequence,
            role: Role::Assistant,
            content: None,
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            tool_input: Some(tool_input),
            tool_output: None,
            model_id: None,
            created_at: Utc::now(),
        }
    }

    /// The tool half of a tool-call pair.
    pub fn tool_result(
        sequence: i64,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_output: Value,
    ) -> Self {
        Message {
            sequence,
            role: Role::Tool,
            content: None,
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            tool_input: None,
            tool_output: Some(tool_output),
            model_id: None,
            created_at: Utc::now(),
        }
    }

    /// A committed final assistant answer.
    pub fn assistant_final(
        sequence: i64,
        model_id: impl Into<String>,
        final_text: &str,
        progress: &[String],
    ) -> Result<Self, serde_json::Error> {
        let content = AssistantContent::AssistantFinal {
            final_text: final_text.to_string(),
            progress: progress.to_vec(),
        };
        Ok(Message {
            sequence,
            role: Role::Assistant,
            content: Some(serde_json::to_string(&content)?),
            tool_call_id: None,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            model_id: Some(model_id.into()),
            created_at: Utc::now(),
        })
    }

    /// A tool-produced artifact hoisted into assistant-visible content.
    pub fn assistant_artifact(
        sequence: i64,
        blocks: &[ContentBlock],
    ) -> Result<Self, serde_json::Error> {
        Ok(Message {
            sequence,
            role: Role::Assistant,
            content: Some(serde_json::to_string(blocks)?),
            tool_call_id: None,
            tool_name: Some(ARTIFACT_TOOL_NAME.to_string()),
            tool_input: None,
            tool_output: None,
            model_id: None,
            created_at: Utc::now(),
        })
    }

    /// A system reminder appended mid-turn (guard reminders, retry warnings).
    pub fn system(sequence: i64, text: impl Into<String>) -> Self {
        Message {
            sequence,
            role: Role::System,
            content: Some(text.into()),
            tool_call_id: None,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            model_id: None,
            created_at: Utc::now(),
        }
    }
}

/// A session: an ordered set of messages plus a default model. The loop
/// never mutates session metadata; only `model_id` is read by the preamble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub user_id: i64,
    pub default_model_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One block of user- or artifact-visible content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrlBlock },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrlBlock {
    pub url: String,
    pub detail: String,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// A `data:image/webp;base64,...` block at `detail: "high"`, matching
    /// every inline page image the core renders.
    pub fn image_webp_base64(base64_data: &str) -> Self {
        ContentBlock::ImageUrl {
            image_url: ImageUrlBlock {
                url: format!("data:image/webp;base64,{base64_data}"),
                detail: "high".to_string(),
            },
        }
    }
}

/// The decoded shape of an assistant message's `content` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    AssistantFinal {
        #[serde(rename = "final")]
        final_text: String,
        progress: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_final_round_trips() {
        let msg = Message::assistant_final(3, "gpt", "hello", &["step one".into()]).unwrap();
        let content = msg.content.clone().unwrap();
        let decoded: AssistantContent = serde_json::from_str(&content).unwrap();
        match decoded {
            AssistantContent::AssistantFinal { final_text, progress } => {
                assert_eq!(final_text, "hello");
                assert_eq!(progress, vec!["step one".to_string()]);
            }
        }
    }

    #[test]
    fn user_content_is_typed_blocks() {
        let blocks = vec![ContentBlock::text("hi")];
        let msg = Message::user(1, &blocks).unwrap();
        let decoded: Vec<ContentBlock> =
            serde_json::from_str(&msg.content.unwrap()).unwrap();
        assert!(matches!(decoded[0], ContentBlock::Text { .. }));
    }
}
