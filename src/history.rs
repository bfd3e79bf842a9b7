//! Ordered message persistence and the projection from stored messages into
//! LLM-chat-shaped messages that get replayed into the model on every turn.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::llm::{AssistantToolCall, ChatMessage, FunctionCall};
use crate::model::{ContentBlock, Message, Role, ARTIFACT_TOOL_NAME};

/// Ordered, append-only persistence for a session's messages.
///
/// Implementations own sequence assignment: `append`/`append_batch` must
/// allocate `sequence` as `max(existing)+1` inside whatever critical section
/// they use to guard against concurrent runs on the same session.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a single message, assigning its `sequence`.
    async fn append(&self, session_id: i64, message: Message) -> Result<Message>;

    /// Append an ordered pair atomically (the assistant tool-call record and
    /// its tool result), assigning consecutive sequences.
    async fn append_batch(&self, session_id: i64, messages: Vec<Message>) -> Result<Vec<Message>>;

    /// The full ordered history for a session.
    async fn list(&self, session_id: i64) -> Result<Vec<Message>>;
}

/// An in-memory `HistoryStore`. The per-session entry in the map is guarded
/// by the outer `Mutex`, which doubles as the advisory per-session lock
/// needed around sequence allocation.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    sessions: Mutex<HashMap<i64, Vec<Message>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn assign_sequence(existing: &[Message]) -> i64 {
        existing.iter().map(|m| m.sequence).max().map(|s| s + 1).unwrap_or(1)
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, session_id: i64, mut message: Message) -> Result<Message> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.entry(session_id).or_default();
        message.sequence = Self::assign_sequence(entry);
        entry.push(message.clone());
        Ok(message)
    }

    async fn append_batch(&self, session_id: i64, mut messages: Vec<Message>) -> Result<Vec<Message>> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.entry(session_id).or_default();
        let mut next = Self::assign_sequence(entry);
        for message in messages.iter_mut() {
            message.sequence = next;
            next += 1;
        }
        entry.extend(messages.iter().cloned());
        Ok(messages)
    }

    async fn list(&self, session_id: i64) -> Result<Vec<Message>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(&session_id).cloned().unwrap_or_default())
    }
}

/// A Postgres-backed `HistoryStore`, mirroring the original `messages` table
/// shape. Sequence allocation is guarded by a per-session `tokio::sync::Mutex`
/// held alongside the insert transaction — the advisory lock calls for,
/// since a bare `SELECT MAX(sequence)` + `INSERT` would otherwise race across
/// concurrent runs on the same session even inside one process.
pub struct SqlHistoryStore {
    pool: sqlx::PgPool,
    session_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SqlHistoryStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        SqlHistoryStore { pool, session_locks: Mutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, session_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks.entry(session_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn next_sequence(pool: &sqlx::PgPool, session_id: i64) -> Result<i64> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(sequence) FROM messages WHERE session_id = $1")
                .bind(session_id)
                .fetch_one(pool)
                .await?;
        Ok(row.0.map(|s| s + 1).unwrap_or(1))
    }

    async fn insert_row(pool: &sqlx::PgPool, session_id: i64, message: &Message) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages \
             (session_id, sequence, role, content, tool_call_id, tool_name, tool_input, tool_output, model_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(session_id)
        .bind(message.sequence)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(&message.tool_call_id)
        .bind(&message.tool_name)
        .bind(&message.tool_input)
        .bind(&message.tool_output)
        .bind(&message.model_id)
        .bind(message.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for SqlHistoryStore {
    async fn append(&self, session_id: i64, mut message: Message) -> Result<Message> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        message.sequence = Self::next_sequence(&self.pool, session_id).await?;
        Self::insert_row(&self.pool, session_id, &message).await?;
        Ok(message)
    }

    async fn append_batch(&self, session_id: i64, mut messages: Vec<Message>) -> Result<Vec<Message>> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let mut next = Self::next_sequence(&self.pool, session_id).await?;
        for message in messages.iter_mut() {
            message.sequence = next;
            Self::insert_row(&self.pool, session_id, message).await?;
            next += 1;
        }
        Ok(messages)
    }

    async fn list(&self, session_id: i64) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT sequence, role, content, tool_call_id, tool_name, tool_input, tool_output, model_id, created_at \
             FROM messages WHERE session_id = $1 ORDER BY sequence ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    sequence: i64,
    role: String,
    content: Option<String>,
    tool_call_id: Option<String>,
    tool_name: Option<String>,
    tool_input: Option<Value>,
    tool_output: Option<Value>,
    model_id: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl MessageRow {
    fn into_message(self) -> Result<Message> {
        let role = match self.role.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            other => return Err(Error::Internal(format!("unknown stored role: {other}"))),
        };
        Ok(Message {
            sequence: self.sequence,
            role,
            content: self.content,
            tool_call_id: self.tool_call_id,
            tool_name: self.tool_name,
            tool_input: self.tool_input,
            tool_output: self.tool_output,
            model_id: self.model_id,
            created_at: self.created_at,
        })
    }
}

/// `loadHistoryForReplay`: project a session's stored messages into
/// the LLM-chat shape the provider expects.
pub async fn load_history_for_replay(
    store: &dyn HistoryStore,
    session_id: i64,
) -> Result<Vec<ChatMessage>> {
    let messages = store.list(session_id).await?;
    messages.into_iter().map(project_message).collect()
}

pub(crate) fn project_message(message: Message) -> Result<ChatMessage> {
    match message.role {
        Role::System => Ok(ChatMessage::system(message.content.unwrap_or_default())),

        Role::User => {
            let blocks: Value = message
                .content
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?
                .unwrap_or(Value::Array(vec![]));
            Ok(ChatMessage::user(blocks))
        }

        Role::Assistant if message.tool_call_id.is_some() => {
            let tool_call_id = message.tool_call_id.clone().unwrap();
            let name = message.tool_name.clone().unwrap_or_default();
            let arguments = message.tool_input.clone().unwrap_or(Value::Null);
            Ok(ChatMessage::assistant_tool_calls(vec![AssistantToolCall {
                id: tool_call_id,
                call_type: "function".to_string(),
                function: FunctionCall { name, arguments: arguments.to_string() },
            }]))
        }

        Role::Assistant if message.tool_name.as_deref() == Some(ARTIFACT_TOOL_NAME) => {
            let blocks: Value = message
                .content
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?
                .unwrap_or(Value::Array(vec![]));
            Ok(ChatMessage::assistant_blocks(blocks))
        }

        Role::Assistant => {
            let raw = message.content.unwrap_or_default();
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(obj)) if obj.get("type").and_then(Value::as_str) == Some("assistant_final") => {
                    let final_text = obj.get("final").and_then(Value::as_str).unwrap_or_default();
                    Ok(ChatMessage::assistant_text(final_text))
                }
                Ok(list @ Value::Array(_)) => Ok(ChatMessage::assistant_blocks(list)),
                _ => Ok(ChatMessage::assistant_text(raw)),
            }
        }

        Role::Tool => {
            let tool_call_id = message.tool_call_id.clone().unwrap_or_default();
            let content = match &message.tool_output {
                Some(Value::Object(_)) => project_tool_result(message.tool_output.unwrap()),
                Some(other) => other.clone(),
                None => Value::Null,
            };
            Ok(ChatMessage::tool(tool_call_id, content))
        }
    }
}

/// `projectToolResult`: hoist `image_blocks` out of a tool result
/// object into a leading text block plus the image blocks themselves; the
/// text fragment has `image_blocks` stripped to avoid double rendering.
pub fn project_tool_result(obj: Value) -> Value {
    let Value::Object(mut map) = obj else {
        return obj;
    };

    let image_blocks = match map.remove("image_blocks") {
        Some(Value::Array(blocks)) if !blocks.is_empty() => blocks,
        Some(other) => {
            // Not a non-empty list after all; put it back unchanged.
            map.insert("image_blocks".to_string(), other);
            return Value::Object(map);
        }
        None => return Value::Object(map),
    };

    let mut out = Vec::with_capacity(1 + image_blocks.len());
    out.push(json!({ "type": "text", "text": Value::Object(map).to_string() }));
    out.extend(image_blocks);
    Value::Array(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentBlock as CB;
    use serde_json::json;

    #[tokio::test]
    async fn sequence_is_monotonic_and_dense_per_session() {
        let store = InMemoryHistoryStore::new();
        let a = store.append(1, Message::system(0, "a")).await.unwrap();
        let b = store.append(1, Message::system(0, "b")).await.unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
    }

    #[tokio::test]
    async fn append_batch_assigns_consecutive_sequences() {
        let store = InMemoryHistoryStore::new();
        let pair = store
            .append_batch(
                1,
                vec![
                    Message::assistant_tool_call(0, "call_1", "reasoning", json!({})),
                    Message::tool_result(0, "call_1", "reasoning", json!({"ready_to_reply": true})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(pair[0].sequence + 1, pair[1].sequence);
        assert_eq!(pair[0].tool_call_id, pair[1].tool_call_id);
    }

    #[test]
    fn project_tool_result_hoists_image_blocks() {
        let obj = json!({
            "success": true,
            "file_id": 9,
            "image_blocks": [{"type": "image_url", "image_url": {"url": "data:image/webp;base64,AA==", "detail": "high"}}],
        });
        let projected = project_tool_result(obj);
        let arr = projected.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["type"], "text");
        let text_field = arr[0]["text"].as_str().unwrap();
        assert!(!text_field.contains("image_blocks"));
        assert_eq!(arr[1]["type"], "image_url");
    }

    #[test]
    fn project_tool_result_passes_through_without_image_blocks() {
        let obj = json!({"success": true, "formatted": "2024-01-01"});
        let projected = project_tool_result(obj.clone());
        assert_eq!(projected, obj);
    }

    #[tokio::test]
    async fn replay_projects_user_and_final_assistant_messages() {
        let store = InMemoryHistoryStore::new();
        store
            .append(1, Message::user(0, &[CB::text("hi")]).unwrap())
            .await
            .unwrap();
        store
            .append(1, Message::assistant_final(0, "gpt", "hello", &[]).unwrap())
            .await
            .unwrap();

        let replayed = load_history_for_replay(&store, 1).await.unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[1].content, Some(json!("hello")));
    }
}
