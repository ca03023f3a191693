use serde_json::Value;

/// A reply-shape matcher: returns the text delta if the frame has this shape.
pub(crate) type DeltaRule = fn(&Value) -> Option<String>;

/// Tried in order against every streamed frame; the first match wins.
pub(crate) const STREAM_DELTA_RULES: [(&str, DeltaRule); 5] = [
    ("message.content", message_content_text),
    ("message.content[].text", message_content_parts),
    ("response", top_level_response),
    ("content", top_level_content),
    ("delta", top_level_delta),
];

/// Tried against the single object returned by a non-streaming request.
pub(crate) const FINAL_TEXT_RULES: [(&str, DeltaRule); 3] = [
    ("message.content", message_content_text),
    ("response", top_level_response),
    ("content", top_level_content),
];

pub(crate) fn first_match(rules: &[(&str, DeltaRule)], frame: &Value) -> Option<String> {
    rules.iter().find_map(|(_, rule)| rule(frame))
}

fn message_content_text(frame: &Value) -> Option<String> {
    frame
        .get("message")
        .filter(|message| message.is_object())?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

fn message_content_parts(frame: &Value) -> Option<String> {
    let parts = frame
        .get("message")
        .filter(|message| message.is_object())?
        .get("content")?
        .as_array()?;
    Some(
        parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect(),
    )
}

fn top_level_response(frame: &Value) -> Option<String> {
    string_field(frame, "response")
}

fn top_level_content(frame: &Value) -> Option<String> {
    string_field(frame, "content")
}

fn top_level_delta(frame: &Value) -> Option<String> {
    string_field(frame, "delta")
}

fn string_field(frame: &Value, key: &str) -> Option<String> {
    frame.get(key)?.as_str().map(str::to_string)
}

/// Decodes one protocol line. Blank lines, SSE comments and anything that is
/// not JSON come back as `None`.
pub(crate) fn parse_frame(line: &str) -> Option<Value> {
    let raw = line.trim();
    let raw = strip_sse_data_prefix(raw).unwrap_or(raw);
    if raw.is_empty() || raw.starts_with(':') {
        return None;
    }
    serde_json::from_str(raw).ok()
}

fn strip_sse_data_prefix(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// The backend's error message, if the frame carries a non-empty `error`.
pub(crate) fn frame_error(frame: &Value) -> Option<String> {
    let error = frame.get("error")?;
    if !is_truthy(error) {
        return None;
    }
    Some(match error {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    })
}

pub(crate) fn is_done(frame: &Value) -> bool {
    frame.get("done").and_then(Value::as_bool) == Some(true)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Splits a byte stream into lines. Bytes are held until a newline arrives so
/// that UTF-8 sequences cut across network reads decode intact.
#[derive(Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(String::from_utf8_lossy(&line[..newline]).into_owned());
        }
        lines
    }

    /// Whatever followed the last newline, if anything.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(frame: Value) -> Option<String> {
        first_match(&STREAM_DELTA_RULES, &frame)
    }

    #[test]
    fn message_content_string_wins_over_top_level_fields() {
        let frame = json!({
            "message": {"role": "assistant", "content": "A"},
            "response": "R",
            "content": "C",
            "delta": "D"
        });
        assert_eq!(delta(frame).as_deref(), Some("A"));
    }

    #[test]
    fn message_content_parts_are_concatenated() {
        let frame = json!({
            "message": {"content": [{"text": "he"}, {"type": "image"}, {"text": "llo"}, "raw"]},
            "response": "ignored"
        });
        assert_eq!(delta(frame).as_deref(), Some("hello"));
    }

    #[test]
    fn empty_parts_list_still_claims_the_frame() {
        let frame = json!({"message": {"content": []}, "response": "ignored"});
        assert_eq!(delta(frame).as_deref(), Some(""));
    }

    #[test]
    fn falls_through_to_top_level_fields_in_order() {
        assert_eq!(
            delta(json!({"message": {"role": "assistant"}, "response": "R", "content": "C"}))
                .as_deref(),
            Some("R")
        );
        assert_eq!(
            delta(json!({"content": "C", "delta": "D"})).as_deref(),
            Some("C")
        );
        assert_eq!(delta(json!({"delta": "D"})).as_deref(), Some("D"));
        assert_eq!(delta(json!({"message": "not an object", "delta": 5})), None);
        assert_eq!(delta(json!(["not", "an", "object"])), None);
    }

    #[test]
    fn final_rules_skip_parts_and_delta() {
        let parts = json!({"message": {"content": [{"text": "x"}]}, "delta": "D"});
        assert_eq!(first_match(&FINAL_TEXT_RULES, &parts), None);
        let response = json!({"response": "C"});
        assert_eq!(
            first_match(&FINAL_TEXT_RULES, &response).as_deref(),
            Some("C")
        );
    }

    #[test]
    fn parse_frame_strips_sse_prefix_and_skips_noise() {
        assert_eq!(
            parse_frame("data: {\"response\":\"x\"}\r"),
            Some(json!({"response": "x"}))
        );
        assert_eq!(
            parse_frame("data:{\"done\":true}"),
            Some(json!({"done": true}))
        );
        assert_eq!(parse_frame(""), None);
        assert_eq!(parse_frame("   "), None);
        assert_eq!(parse_frame(": keep-alive"), None);
        assert_eq!(parse_frame("data: [DONE]"), None);
        assert_eq!(parse_frame("event: message"), None);
    }

    #[test]
    fn error_field_must_be_truthy() {
        assert_eq!(frame_error(&json!({"error": "boom"})).as_deref(), Some("boom"));
        assert_eq!(
            frame_error(&json!({"error": {"code": 500}})).as_deref(),
            Some("{\"code\":500}")
        );
        assert_eq!(frame_error(&json!({"error": ""})), None);
        assert_eq!(frame_error(&json!({"error": null})), None);
        assert_eq!(frame_error(&json!({"response": "ok"})), None);
    }

    #[test]
    fn done_requires_literal_true() {
        assert!(is_done(&json!({"done": true})));
        assert!(!is_done(&json!({"done": "true"})));
        assert!(!is_done(&json!({"done": false})));
        assert!(!is_done(&json!({})));
    }

    #[test]
    fn line_buffer_joins_split_utf8_and_keeps_tail() {
        let mut buffer = LineBuffer::default();
        let text = "{\"response\":\"héllo\"}\n{\"done\":true}";
        let bytes = text.as_bytes();
        let split = text.find('é').expect("accent") + 1;
        assert!(buffer.push(&bytes[..split]).is_empty());
        let lines = buffer.push(&bytes[split..]);
        assert_eq!(lines, vec!["{\"response\":\"héllo\"}".to_string()]);
        assert_eq!(buffer.finish().as_deref(), Some("{\"done\":true}"));
        assert_eq!(buffer.finish(), None);
    }
}
