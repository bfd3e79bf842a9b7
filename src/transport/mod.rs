//! SSE transport: turns an `AgentLoop` run into a wire-level HTTP response,
//! one `event:`/`data:` frame per emitted event, with a keep-alive heartbeat
//! so idle connections don't get reaped by intermediate proxies.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::info;

use crate::agent::{AgentLoop, TurnRequest};
use crate::files::FileStore;
use crate::history::HistoryStore;
use crate::llm::LLMClient;
use crate::tools::ToolRegistry;
use crate::agent::CoreConfig;

/// Request-scoped collaborators an incoming turn is built against.
#[derive(Clone)]
pub struct AppState {
    pub history: Arc<dyn HistoryStore>,
    pub files: Arc<dyn FileStore>,
    pub llm: Arc<dyn LLMClient>,
    pub tools: Arc<ToolRegistry>,
    pub config: CoreConfig,
    pub default_model_id: String,
}

impl AppState {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        files: Arc<dyn FileStore>,
        llm: Arc<dyn LLMClient>,
        tools: Arc<ToolRegistry>,
        config: CoreConfig,
        default_model_id: impl Into<String>,
    ) -> Self {
        AppState { history, files, llm, tools, config, default_model_id: default_model_id.into() }
    }

    fn build_loop(&self) -> AgentLoop {
        AgentLoop::new(
            self.history.clone(),
            self.files.clone(),
            self.llm.clone(),
            self.tools.clone(),
            self.config.clone(),
        )
    }
}

/// The `POST /sessions/{id}/messages` request body.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub files: Vec<i64>,
}

/// Wrap an `AgentEvent` stream into axum SSE frames: `event: <type>` plus a
/// JSON `data:` payload, one per event.
fn adapt_stream(
    session_id: i64,
    events: futures::stream::BoxStream<'static, crate::agent::AgentEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    events.map(move |event| {
        let event_type = event_type_name(&event);
        let data = serde_json::to_string(&event).unwrap_or_default();
        if event.is_terminal() {
            info!(session_id, event_type, "agent turn stream closing");
        }
        Ok(Event::default().event(event_type).data(data))
    })
}

fn event_type_name(event: &crate::agent::AgentEvent) -> &'static str {
    use crate::agent::AgentEvent::*;
    match event {
        Status { .. } => "status",
        Thinking { .. } => "thinking",
        ContentStart { .. } => "content_start",
        ContentDelta { .. } => "content_delta",
        ContentDone { .. } => "content_done",
        ToolCall { .. } => "tool_call",
        ToolExecuting { .. } => "tool_executing",
        ToolResult { .. } => "tool_result",
        IterationInfo { .. } => "iteration_info",
        Retry { .. } => "retry",
        Error { .. } => "error",
        Done { .. } => "done",
    }
}

/// `POST /sessions/{id}/messages`: run one turn and stream its events back.
async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
    Json(body): Json<SendMessageRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let model_id = body.model_id.unwrap_or_else(|| state.default_model_id.clone());

    info!(session_id, model_id = %model_id, "received message");

    let request = TurnRequest { session_id, message: body.message, model_id, file_ids: body.files };

    let agent_loop = state.build_loop();
    let events = agent_loop.run(request);

    Sse::new(adapt_stream(session_id, events))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive"))
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy", "service": "openagent-core" }))
}

/// Build the router exposing the agent-turn endpoint over `AppState`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_check))
        .route("/sessions/{id}/messages", post(send_message))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::InMemoryFileStore;
    use crate::history::InMemoryHistoryStore;
    use crate::llm::{FinishReason, StreamDelta, StubLlmClient};
    use crate::tools::ToolRegistry;

    fn test_state() -> Arc<AppState> {
        let llm = StubLlmClient::new(vec![vec![
            StreamDelta::Content("hello".into()),
            StreamDelta::Finish(FinishReason::Stop),
        ]]);
        Arc::new(AppState::new(
            Arc::new(InMemoryHistoryStore::new()),
            Arc::new(InMemoryFileStore::new()),
            Arc::new(llm),
            Arc::new(ToolRegistry::new()),
            CoreConfig::gateway(),
            "stub-model",
        ))
    }

    #[test]
    fn event_type_name_covers_all_variants() {
        let event = crate::agent::AgentEvent::status("processing", "hi");
        assert_eq!(event_type_name(&event), "status");
        let done = crate::agent::AgentEvent::done(1, 2, 1, 10);
        assert_eq!(event_type_name(&done), "done");
    }

    #[tokio::test]
    async fn send_message_resolves_default_model_when_unset() {
        let state = test_state();
        let body = SendMessageRequest { message: "hi".into(), model_id: None, files: vec![] };
        let model_id = body.model_id.clone().unwrap_or_else(|| state.default_model_id.clone());
        assert_eq!(model_id, "stub-model");
    }

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let state = test_state();
        let _app = router(state);
    }
}
