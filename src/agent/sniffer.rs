//! Textual-Tool-Call Sniffer: recognizes a model emitting tool-call
//! intent as raw JSON in the content channel instead of the structured
//! function-call protocol.

use serde_json::Value;

/// A normalized tool-call candidate recovered from textual content.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCall {
    pub name: String,
    pub arguments: Value,
}

/// The result of draining one segment from the sniffer's buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum SniffedSegment {
    /// Ordinary text — safe to stream to the client as a `content_delta`.
    Emit(String),
    /// One or more tool-call candidates parsed out of the segment; these
    /// never reach the client as content.
    Withheld(Vec<NormalizedCall>),
}

/// A small stateful buffer over the content stream implementing the
/// newline/in-progress-JSON drain policy.
#[derive(Debug, Default)]
pub struct TextualToolCallSniffer {
    buffer: String,
}

impl TextualToolCallSniffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a content delta in; returns any segments the drain policy makes
    /// emittable right now.
    pub fn push(&mut self, delta: &str) -> Vec<SniffedSegment> {
        self.buffer.push_str(delta);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let segment: String = self.buffer.drain(..=pos).collect();
            out.push(process_segment(&segment));
        }

        if !self.buffer.is_empty() && !looks_like_in_progress_json(&self.buffer) {
            let segment = std::mem::take(&mut self.buffer);
            out.push(process_segment(&segment));
        }

        out
    }

    /// Final drain: whatever remains is examined regardless of shape.
    pub fn finish(&mut self) -> Vec<SniffedSegment> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let segment = std::mem::take(&mut self.buffer);
        vec![process_segment(&segment)]
    }
}

fn looks_like_in_progress_json(buffer: &str) -> bool {
    matches!(buffer.trim_start().chars().next(), Some('{') | Some('['))
}

fn process_segment(segment: &str) -> SniffedSegment {
    let calls = parse_candidates(segment);
    if calls.is_empty() {
        SniffedSegment::Emit(segment.to_string())
    } else {
        SniffedSegment::Withheld(calls)
    }
}

/// Candidate parsing.
fn parse_candidates(segment: &str) -> Vec<NormalizedCall> {
    let trimmed = segment.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    // Step 1: try the whole segment as one JSON value.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        match value {
            Value::Array(items) => {
                let calls: Vec<NormalizedCall> = items.iter().filter_map(normalize).collect();
                if !calls.is_empty() {
                    return calls;
                }
            }
            Value::Object(_) => {
                if let Some(call) = normalize(&value) {
                    return vec![call];
                }
            }
            _ => {}
        }
    }

    // Step 2: line-by-line, trimming trailing commas.
    trimmed
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_end_matches(',');
            if line.is_empty() {
                return None;
            }
            serde_json::from_str::<Value>(line).ok().as_ref().and_then(normalize)
        })
        .collect()
}

fn normalize(value: &Value) -> Option<NormalizedCall> {
    let obj = value.as_object()?;

    let explicit_name = ["name", "tool_name", "function"]
        .iter()
        .find_map(|key| obj.get(*key))
        .and_then(Value::as_str)
        .map(str::to_string);

    // When none of the usual argument-envelope keys are present, treat the
    // whole dict as the argument shape itself — this is what lets a bare
    // `{"query": "..."}` (no `name`/`arguments` wrapper) still infer a name.
    let arguments = ["arguments", "args", "input", "parameters", "payload"]
        .iter()
        .find_map(|key| obj.get(*key))
        .cloned()
        .unwrap_or_else(|| value.clone());

    let name = explicit_name.or_else(|| infer_name(&arguments))?;
    Some(NormalizedCall { name, arguments })
}

/// Fixed name-inference table for dicts that omit an explicit name.
fn infer_name(arguments: &Value) -> Option<String> {
    let obj = arguments.as_object()?;
    let has = |key: &str| obj.contains_key(key);

    if has("thinking_focus") && has("specific_question") {
        Some("reasoning".to_string())
    } else if has("query") || has("queries") {
        Some("web_search".to_string())
    } else if has("timezone") {
        Some("get_current_time".to_string())
    } else if has("url") {
        Some("browse".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_is_emitted_immediately() {
        let mut sniffer = TextualToolCallSniffer::new();
        let segments = sniffer.push("hello there");
        assert_eq!(segments, vec![SniffedSegment::Emit("hello there".to_string())]);
    }

    #[test]
    fn in_progress_json_is_withheld_until_newline() {
        let mut sniffer = TextualToolCallSniffer::new();
        assert!(sniffer.push("{\"name\":\"ddgs_search\",").is_empty());
        let segments = sniffer.push("\"arguments\":{\"query\":\"x\"}}\n");
        assert_eq!(segments.len(), 1);
        match &segments[0] {
            SniffedSegment::Withheld(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "ddgs_search");
                assert_eq!(calls[0].arguments, json!({"query": "x"}));
            }
            other => panic!("expected withheld, got {other:?}"),
        }
    }

    #[test]
    fn name_is_inferred_from_argument_shape() {
        let mut sniffer = TextualToolCallSniffer::new();
        let segments = sniffer.push("{\"thinking_focus\":\"a\",\"specific_question\":\"b\",\"ready_to_reply\":false}\n");
        match &segments[0] {
            SniffedSegment::Withheld(calls) => assert_eq!(calls[0].name, "reasoning"),
            other => panic!("expected withheld, got {other:?}"),
        }
    }

    #[test]
    fn unnameable_dict_is_discarded_not_withheld() {
        let mut sniffer = TextualToolCallSniffer::new();
        let segments = sniffer.push("{\"foo\":\"bar\"}\n");
        assert_eq!(segments, vec![SniffedSegment::Emit("{\"foo\":\"bar\"}\n".to_string())]);
    }

    #[test]
    fn finish_drains_remainder_regardless_of_shape() {
        let mut sniffer = TextualToolCallSniffer::new();
        // Starts with `{` so it's held back as in-progress JSON even though
        // it never grows another newline before the stream closes.
        assert!(sniffer.push("{\"query\":\"x\"}").is_empty());
        let segments = sniffer.finish();
        assert_eq!(segments.len(), 1);
        assert!(matches!(segments[0], SniffedSegment::Withheld(_)));
    }
}
