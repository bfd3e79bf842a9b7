//! The agent execution loop: the per-turn state machine that drives
//! the LLM, dispatches tool calls, applies the reply-guard and the three
//! retry paths, and persists everything through a `HistoryStore`.
//!
//! Iteration/retry counters, tool-call accumulation, and `continue`-based
//! iteration drive the loop; structured tracing at each step surfaces
//! progress without leaning on the event stream itself.

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::config::CoreConfig;
use super::events::{AgentEvent, ErrorCode, RetryReason};
use super::sniffer::{NormalizedCall, SniffedSegment, TextualToolCallSniffer};
use crate::files::FileStore;
use crate::history::{project_message, HistoryStore};
use crate::llm::{ChatMessage, FinishReason, LLMClient, StreamDelta, ToolChoice};
use crate::model::{ContentBlock, Message};
use crate::tools::{ToolCall, ToolRegistry, ToolResult};

/// A single incoming turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: i64,
    pub message: String,
    /// Already resolved by the caller (request override or session default);
    /// the loop does not look up a session record itself.
    pub model_id: String,
    pub file_ids: Vec<i64>,
}

/// The collaborators an `AgentLoop` run needs. Held behind `Arc` so a single
/// instance can be cloned cheaply per incoming request.
#[derive(Clone)]
pub struct AgentLoop {
    history: Arc<dyn HistoryStore>,
    files: Arc<dyn FileStore>,
    llm: Arc<dyn LLMClient>,
    tools: Arc<ToolRegistry>,
    config: CoreConfig,
}

impl AgentLoop {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        files: Arc<dyn FileStore>,
        llm: Arc<dyn LLMClient>,
        tools: Arc<ToolRegistry>,
        config: CoreConfig,
    ) -> Self {
        AgentLoop { history, files, llm, tools, config }
    }

    /// Run one turn, producing a lazy sequence of events. The stream always
    /// ends with exactly one of `Done`/`Error`; dropping it early
    /// (consumer disconnect) simply stops the underlying task at its
    /// next suspension point without persisting any unflushed assistant text.
    pub fn run(self, request: TurnRequest) -> BoxStream<'static, AgentEvent> {
        Box::pin(stream! {
            let start_time = Instant::now();
            let session_id = request.session_id;
            let model_id = request.model_id.clone();

            info!(session_id, model_id = %model_id, "starting agent turn");
            yield AgentEvent::status("processing", "Processing your message...");

            // --- Preamble ---------------------------------
            let mut messages = match crate::history::load_history_for_replay(self.history.as_ref(), session_id).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(session_id, error = %e, "failed to load history for replay");
                    yield AgentEvent::error(ErrorCode::InternalError, format!("failed to load history: {e}"));
                    return;
                }
            };

            let needs_system_prompt = messages.first().map(|m| m.role != crate::llm::ChatRole::System).unwrap_or(true);
            if needs_system_prompt {
                messages.insert(0, ChatMessage::system(self.config.system_prompt.clone()));
            }

            let user_blocks = match build_user_content_blocks(&request.message, &request.file_ids, self.files.as_ref()).await {
                Ok(blocks) => blocks,
                Err(e) => {
                    yield AgentEvent::error(ErrorCode::InternalError, format!("failed to build message content: {e}"));
                    return;
                }
            };

            let user_message = match Message::user(0, &user_blocks) {
                Ok(m) => m,
                Err(e) => {
                    yield AgentEvent::error(ErrorCode::InternalError, format!("failed to encode user message: {e}"));
                    return;
                }
            };
            let persisted_user = match self.history.append(session_id, user_message).await {
                Ok(m) => m,
                Err(e) => {
                    yield AgentEvent::error(ErrorCode::InternalError, format!("failed to persist user message: {e}"));
                    return;
                }
            };
            match project_message(persisted_user) {
                Ok(cm) => messages.push(cm),
                Err(e) => {
                    yield AgentEvent::error(ErrorCode::InternalError, format!("failed to project user message: {e}"));
                    return;
                }
            }

            // --- Iteration state (per turn) ------
            let mut iteration: u32 = 0;
            let mut retry_count: u32 = 0;
            let mut ready_to_reply_guard = false;
            let mut progress_buffer = String::new();
            let mut progress_segments: Vec<String> = Vec::new();
            let mut force_reasoning_next = false;
            let mut self_check_reminder_inserted = false;
            let mut last_stream_guard_state: Option<bool> = None;

            let tool_definitions = self.tools.definitions();

            'turn: while iteration < self.config.max_iterations {
                yield AgentEvent::thinking("Thinking about how to respond...");

                let tool_choice =
                    if force_reasoning_next { Some(ToolChoice::function("reasoning")) } else { None };

                let mut delta_stream = match self
                    .llm
                    .stream(messages.clone(), tool_definitions.clone(), tool_choice, &model_id)
                    .await
                {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(session_id, error = %e, "LLM stream call failed");
                        yield AgentEvent::error(ErrorCode::InternalError, format!("LLM call failed: {e}"));
                        return;
                    }
                };

                let mut sniffer = TextualToolCallSniffer::new();
                let mut tool_acc = ToolCallAccumulator::new();
                let mut full_content = String::new();
                let mut textual_calls = Vec::new();
                let mut finish_reason: Option<FinishReason> = None;

                loop {
                    let next = delta_stream.next().await;
                    let Some(delta_result) = next else { break };
                    let delta = match delta_result {
                        Ok(d) => d,
                        Err(e) => {
                            warn!(session_id, error = %e, "LLM stream delta failed");
                            yield AgentEvent::error(ErrorCode::InternalError, format!("LLM stream failed: {e}"));
                            return;
                        }
                    };

                    match delta {
                        StreamDelta::Content(text) => {
                            for segment in sniffer.push(&text) {
                                match route_segment(segment, ready_to_reply_guard, last_stream_guard_state) {
                                    Routed::Content { content_start, text, guarded } => {
                                        if let Some((message, g)) = content_start {
                                            yield AgentEvent::content_start(message, g);
                                            last_stream_guard_state = Some(g);
                                        }
                                        if guarded {
                                            progress_buffer.push_str(&text);
                                        } else {
                                            full_content.push_str(&text);
                                        }
                                        yield AgentEvent::content_delta(text, guarded);
                                    }
                                    Routed::Withheld(calls) => textual_calls.extend(calls),
                                }
                            }
                        }
                        StreamDelta::ToolCallDelta { index, id, name, arguments_delta } => {
                            tool_acc.push(index, id, name, arguments_delta);
                        }
                        StreamDelta::Finish(reason) => finish_reason = Some(reason),
                    }
                }

                for segment in sniffer.finish() {
                    match route_segment(segment, ready_to_reply_guard, last_stream_guard_state) {
                        Routed::Content { content_start, text, guarded } => {
                            if let Some((message, g)) = content_start {
                                yield AgentEvent::content_start(message, g);
                                last_stream_guard_state = Some(g);
                            }
                            if guarded {
                                progress_buffer.push_str(&text);
                            } else {
                                full_content.push_str(&text);
                            }
                            yield AgentEvent::content_delta(text, guarded);
                        }
                        Routed::Withheld(calls) => textual_calls.extend(calls),
                    }
                }

                // step 3: coerce a missing finish_reason to "stop" when
                // unguarded text arrived with no tool call in flight.
                if finish_reason.is_none() && !full_content.trim().is_empty() && tool_acc.is_empty() {
                    finish_reason = Some(FinishReason::Stop);
                }

                match finish_reason {
                    Some(FinishReason::ToolCalls) if !tool_acc.is_empty() => {
                        let calls = tool_acc.finalize();

                        if calls.len() > 1 {
                            if retry_count >= self.config.max_retry_on_multiple_tools {
                                yield AgentEvent::error(
                                    ErrorCode::MultipleToolsMaxRetries,
                                    format!(
                                        "model kept invoking multiple tools after {} retries",
                                        self.config.max_retry_on_multiple_tools
                                    ),
                                );
                                return;
                            }
                            retry_count += 1;
                            yield AgentEvent::retry(
                                RetryReason::MultipleToolsCalled,
                                retry_count,
                                self.config.max_retry_on_multiple_tools,
                                format!(
                                    "model invoked {} tools, retrying ({}/{})...",
                                    calls.len(), retry_count, self.config.max_retry_on_multiple_tools
                                ),
                            );
                            messages.push(ChatMessage::system(self.config.multiple_tools_warning.clone()));
                            continue 'turn;
                        }

                        let call = calls.into_iter().next().expect("checked non-empty above");

                        iteration += 1;
                        yield AgentEvent::iteration_info(
                            iteration,
                            self.config.max_iterations,
                            format!("Tool call iteration {iteration}"),
                        );

                        let tool_name = strip_functions_prefix(&call.name).to_string();
                        let tool_input = parse_tool_arguments(&call.arguments);

                        yield AgentEvent::tool_call(call.id.clone(), tool_name.clone(), tool_input.clone());
                        yield AgentEvent::tool_executing(
                            call.id.clone(),
                            tool_name.clone(),
                            format!("Executing tool {tool_name}..."),
                        );

                        let tool_call = ToolCall { id: call.id.clone(), name: tool_name.clone(), arguments: tool_input.clone() };
                        let tool_result = if self.tools.is_io_heavy(&tool_name) {
                            let tools = self.tools.clone();
                            let call_for_task = tool_call.clone();
                            let history_for_task = messages.clone();
                            match tokio::spawn(async move { tools.execute(&call_for_task, &history_for_task, session_id).await }).await {
                                Ok(Ok(result)) => result,
                                Ok(Err(e)) => ToolResult::err(e.to_string()),
                                Err(join_err) => ToolResult::err(format!("tool task panicked: {join_err}")),
                            }
                        } else {
                            match self.tools.execute(&tool_call, &messages, session_id).await {
                                Ok(result) => result,
                                Err(e) => ToolResult::err(e.to_string()),
                            }
                        };

                        yield AgentEvent::tool_result(
                            call.id.clone(),
                            tool_name.clone(),
                            tool_result.to_output_json(),
                            tool_result.success,
                        );

                        let pair = vec![
                            Message::assistant_tool_call(0, call.id.clone(), tool_name.clone(), tool_input.clone()),
                            Message::tool_result(0, call.id.clone(), tool_name.clone(), tool_result.to_output_json()),
                        ];
                        let persisted = match self.history.append_batch(session_id, pair).await {
                            Ok(p) => p,
                            Err(e) => {
                                yield AgentEvent::error(ErrorCode::InternalError, format!("failed to persist tool turn: {e}"));
                                return;
                            }
                        };
                        for m in persisted {
                            match project_message(m) {
                                Ok(cm) => messages.push(cm),
                                Err(e) => {
                                    yield AgentEvent::error(ErrorCode::InternalError, format!("failed to project tool turn: {e}"));
                                    return;
                                }
                            }
                        }

                        if let Some(file_id) = tool_result.file_id {
                            let pages = match self.files.pages(file_id).await {
                                Ok(pages) => pages,
                                Err(e) => {
                                    yield AgentEvent::error(ErrorCode::InternalError, format!("failed to load artifact pages: {e}"));
                                    return;
                                }
                            };
                            let note = tool_result.note.clone().unwrap_or_default();
                            let page_count = tool_result.page_count.unwrap_or(pages.len() as u32);
                            let mut blocks = vec![ContentBlock::text(format!(
                                "(tool) {note} (file_id={file_id}, pages={page_count})"
                            ))];
                            for page in &pages {
                                blocks.push(ContentBlock::image_webp_base64(&page.image_data_base64));
                            }

                            let artifact = match Message::assistant_artifact(0, &blocks) {
                                Ok(m) => m,
                                Err(e) => {
                                    yield AgentEvent::error(ErrorCode::InternalError, format!("failed to encode artifact: {e}"));
                                    return;
                                }
                            };
                            let persisted_artifact = match self.history.append(session_id, artifact).await {
                                Ok(m) => m,
                                Err(e) => {
                                    yield AgentEvent::error(ErrorCode::InternalError, format!("failed to persist artifact: {e}"));
                                    return;
                                }
                            };
                            match project_message(persisted_artifact) {
                                Ok(cm) => messages.push(cm),
                                Err(e) => {
                                    yield AgentEvent::error(ErrorCode::InternalError, format!("failed to project artifact: {e}"));
                                    return;
                                }
                            }
                        }

                        if tool_name == "reasoning" {
                            let ready_flag = tool_result.content.get("ready_to_reply").and_then(Value::as_bool);
                            match ready_flag {
                                Some(true) => {
                                    if let Some(reminder) = self.config.self_check_reminder.clone() {
                                        if !self_check_reminder_inserted {
                                            messages.push(ChatMessage::system(reminder));
                                            self_check_reminder_inserted = true;
                                        }
                                    }
                                    flush_progress(&mut progress_buffer, &mut progress_segments);
                                    ready_to_reply_guard = false;
                                    last_stream_guard_state = None;
                                }
                                Some(false) => {
                                    ready_to_reply_guard = true;
                                    last_stream_guard_state = None;
                                    push_reminder_unless_tail(&mut messages, &self.config.ready_to_reply_reminder);
                                }
                                None => {}
                            }
                        }

                        retry_count = 0;
                        force_reasoning_next = false;
                        continue 'turn;
                    }

                    Some(FinishReason::Stop) => {
                        if !textual_calls.is_empty() {
                            debug!(session_id, count = textual_calls.len(), "textual tool call detected");
                            if retry_count >= self.config.max_retry_on_multiple_tools {
                                yield AgentEvent::error(
                                    ErrorCode::TextualToolCallMaxRetries,
                                    "model kept emitting tool-call JSON as text instead of a structured call",
                                );
                                return;
                            }
                            retry_count += 1;
                            yield AgentEvent::retry(
                                RetryReason::TextualToolCall,
                                retry_count,
                                self.config.max_retry_on_multiple_tools,
                                "model emitted a tool call as text instead of using the tool-call channel; retrying...",
                            );
                            messages.push(ChatMessage::system(
                                "Use the structured tool-call channel instead of writing tool-call JSON as text, \
                                 and make at most one call per turn.",
                            ));
                            force_reasoning_next = true;
                            continue 'turn;
                        }

                        if full_content.trim().is_empty() {
                            if retry_count >= self.config.max_retry_on_multiple_tools {
                                yield AgentEvent::error(
                                    ErrorCode::EmptyResponseMaxRetries,
                                    "model returned an empty response after max retries",
                                );
                                return;
                            }
                            retry_count += 1;
                            yield AgentEvent::retry(
                                RetryReason::EmptyContent,
                                retry_count,
                                self.config.max_retry_on_multiple_tools,
                                "model returned an empty response; retrying...",
                            );
                            messages.push(ChatMessage::system(
                                "Your last response had no content. Call a tool or provide a final answer.",
                            ));
                            force_reasoning_next = true;
                            continue 'turn;
                        }

                        if ready_to_reply_guard {
                            flush_progress(&mut progress_buffer, &mut progress_segments);
                            yield AgentEvent::status(
                                "awaiting_more_actions",
                                "Reasoning marked the task as not ready for a final answer. Continue executing the plan.",
                            );
                            push_reminder_unless_tail(&mut messages, &self.config.ready_to_reply_reminder);
                            last_stream_guard_state = None;
                            continue 'turn;
                        }

                        flush_progress(&mut progress_buffer, &mut progress_segments);

                        let final_message =
                            match Message::assistant_final(0, model_id.clone(), &full_content, &progress_segments) {
                                Ok(m) => m,
                                Err(e) => {
                                    yield AgentEvent::error(ErrorCode::InternalError, format!("failed to encode final answer: {e}"));
                                    return;
                                }
                            };
                        let persisted_final = match self.history.append(session_id, final_message).await {
                            Ok(m) => m,
                            Err(e) => {
                                yield AgentEvent::error(ErrorCode::InternalError, format!("failed to persist final answer: {e}"));
                                return;
                            }
                        };

                        yield AgentEvent::content_done();
                        let total_time_ms = start_time.elapsed().as_millis() as i64;
                        info!(session_id, iteration, total_time_ms, "agent turn completed");
                        yield AgentEvent::done(persisted_final.sequence, session_id, iteration, total_time_ms);
                        return;
                    }

                    other => {
                        warn!(session_id, ?other, "unexpected finish_reason");
                        if retry_count >= self.config.max_retry_on_multiple_tools {
                            yield AgentEvent::error(
                                ErrorCode::UnexpectedFinishReason,
                                format!("unexpected finish_reason: {other:?}"),
                            );
                            return;
                        }
                        retry_count += 1;
                        yield AgentEvent::retry(
                            RetryReason::EmptyFinishReason,
                            retry_count,
                            self.config.max_retry_on_multiple_tools,
                            format!("unexpected finish_reason ({other:?}); retrying..."),
                        );
                        force_reasoning_next = true;
                        continue 'turn;
                    }
                }
            }

            warn!(session_id, iteration, "agent turn reached the iteration ceiling");
            yield AgentEvent::error(
                ErrorCode::MaxIterationsReached,
                format!("reached the maximum of {} iterations without a final answer", self.config.max_iterations),
            );
        })
    }
}

fn flush_progress(buffer: &mut String, segments: &mut Vec<String>) {
    let trimmed = buffer.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
    buffer.clear();
}

fn push_reminder_unless_tail(messages: &mut Vec<ChatMessage>, reminder: &str) {
    let already_tail = messages
        .last()
        .map(|m| m.content.as_ref() == Some(&Value::String(reminder.to_string())))
        .unwrap_or(false);
    if !already_tail {
        messages.push(ChatMessage::system(reminder.to_string()));
    }
}

fn strip_functions_prefix(name: &str) -> &str {
    name.strip_prefix("functions.").unwrap_or(name)
}

fn parse_tool_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw }))
}

/// Build the user content array: a text block followed, for
/// each referenced file, by a page header and an image block per rendered
/// page. Missing files or pages are skipped silently.
async fn build_user_content_blocks(
    message: &str,
    file_ids: &[i64],
    files: &dyn FileStore,
) -> crate::error::Result<Vec<ContentBlock>> {
    let mut blocks = vec![ContentBlock::text(message.to_string())];

    for &file_id in file_ids {
        let Some(record) = files.lookup(file_id).await? else { continue };
        for page in files.pages(file_id).await? {
            blocks.push(ContentBlock::text(format!(
                "\n[File: {}, Page {}]",
                record.filename, page.page_number
            )));
            blocks.push(ContentBlock::image_webp_base64(&page.image_data_base64));
        }
    }

    Ok(blocks)
}

/// What to do with one drained sniffer segment, computed without touching
/// the loop's mutable accumulators directly (kept pure so both the
/// in-stream and final-drain call sites apply it identically).
enum Routed {
    Content { content_start: Option<(String, bool)>, text: String, guarded: bool },
    Withheld(Vec<NormalizedCall>),
}

fn route_segment(segment: SniffedSegment, guard: bool, last_guard_state: Option<bool>) -> Routed {
    match segment {
        SniffedSegment::Emit(text) => {
            let content_start = if last_guard_state != Some(guard) {
                let message = if guard { "Sharing execution progress..." } else { "Starting response generation..." };
                Some((message.to_string(), guard))
            } else {
                None
            };
            Routed::Content { content_start, text, guarded: guard }
        }
        SniffedSegment::Withheld(calls) => Routed::Withheld(calls),
    }
}

/// A partially-assembled tool call, keyed by the delta `index` the provider
/// streams, since an `id` may not appear until the first fragment lands.
#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialToolCall>,
}

impl ToolCallAccumulator {
    fn new() -> Self {
        Self::default()
    }

    fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn push(&mut self, index: u32, id: Option<String>, name: Option<String>, arguments_delta: Option<String>) {
        let entry = self.calls.entry(index).or_default();
        if let Some(id) = id {
            entry.id = id;
        }
        if let Some(name) = name {
            entry.name = name;
        }
        if let Some(fragment) = arguments_delta {
            entry.arguments.push_str(&fragment);
        }
    }

    /// Assembled calls in index order, arguments still the raw accumulated
    /// JSON string (parsed at the call site via `parse_tool_arguments`).
    fn finalize(self) -> Vec<AssembledCall> {
        self.calls
            .into_values()
            .map(|c| AssembledCall { id: c.id, name: c.name, arguments: c.arguments })
            .collect()
    }
}

/// One fully-assembled (but not yet argument-parsed) tool call.
#[derive(Debug, Clone)]
struct AssembledCall {
    id: String,
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_accumulator_assembles_by_index() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, Some("call_1".into()), Some("get_current_time".into()), Some("{\"time".into()));
        acc.push(0, None, None, Some("zone\":\"UTC\"}".into()));
        assert!(!acc.is_empty());
        let calls = acc.finalize();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "get_current_time");
        assert_eq!(calls[0].arguments, "{\"timezone\":\"UTC\"}");
    }

    #[test]
    fn strip_functions_prefix_removes_namespace() {
        assert_eq!(strip_functions_prefix("functions.echo"), "echo");
        assert_eq!(strip_functions_prefix("echo"), "echo");
    }

    #[test]
    fn parse_tool_arguments_wraps_invalid_json() {
        let value = parse_tool_arguments("not json");
        assert_eq!(value, serde_json::json!({"raw": "not json"}));
    }

    #[tokio::test]
    async fn build_user_content_blocks_skips_missing_files() {
        let store = crate::files::InMemoryFileStore::new();
        let blocks = build_user_content_blocks("hi", &[999], &store).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(blocks[0], ContentBlock::Text { .. }));
    }

    use crate::files::InMemoryFileStore;
    use crate::history::InMemoryHistoryStore;
    use crate::llm::StubLlmClient;
    use crate::tools::{EchoTool, ReasoningTool};

    fn test_loop(scripts: Vec<Vec<StreamDelta>>) -> (AgentLoop, Arc<InMemoryHistoryStore>) {
        let history = Arc::new(InMemoryHistoryStore::new());
        let files = Arc::new(InMemoryFileStore::new());
        let llm = Arc::new(StubLlmClient::new(scripts));
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(ReasoningTool);
        let tools = Arc::new(registry);
        let config = CoreConfig::interactive();
        (AgentLoop::new(history.clone(), files, llm, tools, config), history)
    }

    fn turn(session_id: i64, message: &str) -> TurnRequest {
        TurnRequest { session_id, message: message.to_string(), model_id: "stub-model".to_string(), file_ids: vec![] }
    }

    async fn collect(agent_loop: AgentLoop, request: TurnRequest) -> Vec<AgentEvent> {
        agent_loop.run(request).collect().await
    }

    #[tokio::test]
    async fn single_final_answer_emits_content_then_done() {
        let (agent_loop, _history) = test_loop(vec![vec![
            StreamDelta::Content("Hello there".into()),
            StreamDelta::Finish(FinishReason::Stop),
        ]]);

        let events = collect(agent_loop, turn(1, "hi")).await;

        assert!(events.iter().any(|e| matches!(e, AgentEvent::ContentStart { .. })));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ContentDone { .. })));
        let last = events.last().unwrap();
        assert!(matches!(last, AgentEvent::Done { .. }));
    }

    #[tokio::test]
    async fn one_tool_call_then_final_answer() {
        let (agent_loop, history) = test_loop(vec![
            vec![
                StreamDelta::ToolCallDelta {
                    index: 0,
                    id: Some("call_1".into()),
                    name: Some("echo".into()),
                    arguments_delta: Some("{\"text\":\"hi\"}".into()),
                },
                StreamDelta::Finish(FinishReason::ToolCalls),
            ],
            vec![StreamDelta::Content("done".into()), StreamDelta::Finish(FinishReason::Stop)],
        ]);

        let events = collect(agent_loop, turn(2, "please echo hi")).await;

        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolCall { .. })));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolResult { success: true, .. })));
        assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));

        let stored = history.list(2).await.unwrap();
        // user message, assistant tool-call, tool result, final answer.
        assert_eq!(stored.len(), 4);
    }

    #[tokio::test]
    async fn reasoning_guard_defers_then_allows_final_answer() {
        let (agent_loop, _history) = test_loop(vec![
            vec![
                StreamDelta::ToolCallDelta {
                    index: 0,
                    id: Some("call_1".into()),
                    name: Some("reasoning".into()),
                    arguments_delta: Some(
                        "{\"thinking_focus\":\"plan\",\"specific_question\":\"what next\",\"ready_to_reply\":false}"
                            .into(),
                    ),
                },
                StreamDelta::Finish(FinishReason::ToolCalls),
            ],
            vec![StreamDelta::Content("still working".into()), StreamDelta::Finish(FinishReason::Stop)],
            vec![
                StreamDelta::ToolCallDelta {
                    index: 0,
                    id: Some("call_2".into()),
                    name: Some("reasoning".into()),
                    arguments_delta: Some(
                        "{\"thinking_focus\":\"wrap up\",\"specific_question\":\"anything left\",\"ready_to_reply\":true}"
                            .into(),
                    ),
                },
                StreamDelta::Finish(FinishReason::ToolCalls),
            ],
            vec![StreamDelta::Content("final answer".into()), StreamDelta::Finish(FinishReason::Stop)],
        ]);

        let events = collect(agent_loop, turn(3, "do something")).await;

        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::Status { status, .. } if status == "awaiting_more_actions")));
        assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));
    }

    #[tokio::test]
    async fn multiple_tools_in_one_turn_are_retried_then_fail() {
        let script = vec![
            StreamDelta::ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("echo".into()),
                arguments_delta: Some("{\"text\":\"a\"}".into()),
            },
            StreamDelta::ToolCallDelta {
                index: 1,
                id: Some("call_2".into()),
                name: Some("echo".into()),
                arguments_delta: Some("{\"text\":\"b\"}".into()),
            },
            StreamDelta::Finish(FinishReason::ToolCalls),
        ];
        // interactive() config caps max_retry_on_multiple_tools at 2; the
        // model keeps calling two tools every time so the retry budget is
        // exhausted and the turn ends in a fatal error.
        let (agent_loop, _history) =
            test_loop(vec![script.clone(), script.clone(), script.clone(), script]);

        let events = collect(agent_loop, turn(4, "do two things")).await;

        let retries = events.iter().filter(|e| matches!(e, AgentEvent::Retry { reason: RetryReason::MultipleToolsCalled, .. })).count();
        assert!(retries >= 1);
        assert!(matches!(
            events.last().unwrap(),
            AgentEvent::Error { error_code: ErrorCode::MultipleToolsMaxRetries, .. }
        ));
    }

    #[tokio::test]
    async fn textual_tool_call_is_retried() {
        let (agent_loop, _history) = test_loop(vec![
            vec![
                StreamDelta::Content("{\"name\":\"echo\",\"arguments\":{\"text\":\"hi\"}}\n".into()),
                StreamDelta::Finish(FinishReason::Stop),
            ],
            vec![StreamDelta::Content("a clean final answer".into()), StreamDelta::Finish(FinishReason::Stop)],
        ]);

        let events = collect(agent_loop, turn(5, "hi")).await;

        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::Retry { reason: RetryReason::TextualToolCall, .. })));
        assert!(matches!(events.last().unwrap(), AgentEvent::Done { .. }));
    }

    #[tokio::test]
    async fn max_iterations_reached_is_fatal() {
        let tool_script = vec![
            StreamDelta::ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("echo".into()),
                arguments_delta: Some("{\"text\":\"x\"}".into()),
            },
            StreamDelta::Finish(FinishReason::ToolCalls),
        ];
        let (agent_loop, _history) = test_loop(vec![tool_script; 10]);

        let events = collect(agent_loop, turn(6, "loop forever")).await;

        assert!(matches!(
            events.last().unwrap(),
            AgentEvent::Error { error_code: ErrorCode::MaxIterationsReached, .. }
        ));
    }
}
