//! Extracts assistant events from a CodeWhisperer response body.
//!
//! The body is an AWS event-stream: binary framing interleaved with JSON
//! payloads. Rather than decode the envelope, the scanner looks for the JSON
//! object prefixes the assistant surface emits and extracts each object with
//! a balanced-brace scan that is aware of string literals and escapes.

use serde_json::Value as JsonValue;

const EVENT_PREFIXES: &[&str] = &[
    "{\"content\":",
    "{\"name\":",
    "{\"followupPrompt\":",
    "{\"input\":",
    "{\"stop\":",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AssistantEvent {
    Content(String),
    ToolUseStart { id: Option<String>, name: String },
    ToolUseInput(String),
    ToolUseStop,
    FollowupPrompt(JsonValue),
}

/// Incremental scanner; feed body chunks as they arrive.
#[derive(Debug, Default)]
pub(crate) struct AssistantEventScanner {
    buf: Vec<u8>,
}

impl AssistantEventScanner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<AssistantEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            let Some(start) = earliest_prefix(&self.buf) else {
                // Keep a tail in case a prefix is split across chunks.
                let keep = self.buf.len().min(32);
                self.buf.drain(..self.buf.len() - keep);
                break;
            };
            let Some(end) = balanced_object_end(&self.buf[start..]) else {
                // Incomplete object; drop the noise before it and wait.
                self.buf.drain(..start);
                break;
            };
            let object = &self.buf[start..start + end];
            if let Ok(value) = serde_json::from_slice::<JsonValue>(object)
                && let Some(event) = classify(&value)
            {
                events.push(event);
            }
            self.buf.drain(..start + end);
        }

        events
    }
}

/// One-shot scan of a fully buffered body.
pub(crate) fn scan_assistant_events(body: &[u8]) -> Vec<AssistantEvent> {
    let mut scanner = AssistantEventScanner::new();
    scanner.push(body)
}

fn earliest_prefix(buf: &[u8]) -> Option<usize> {
    EVENT_PREFIXES
        .iter()
        .filter_map(|prefix| find_subslice(buf, prefix.as_bytes()))
        .min()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Byte length of the balanced JSON object at the head of `buf`, or `None`
/// if the buffer ends mid-object.
fn balanced_object_end(buf: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in buf.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn classify(value: &JsonValue) -> Option<AssistantEvent> {
    let object = value.as_object()?;
    if let Some(content) = object.get("content").and_then(|v| v.as_str()) {
        return Some(AssistantEvent::Content(content.to_string()));
    }
    if let Some(name) = object.get("name").and_then(|v| v.as_str()) {
        let id = object
            .get("toolUseId")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        return Some(AssistantEvent::ToolUseStart {
            id,
            name: name.to_string(),
        });
    }
    if let Some(input) = object.get("input").and_then(|v| v.as_str()) {
        return Some(AssistantEvent::ToolUseInput(input.to_string()));
    }
    if object.contains_key("stop") {
        return Some(AssistantEvent::ToolUseStop);
    }
    if let Some(prompt) = object.get("followupPrompt") {
        return Some(AssistantEvent::FollowupPrompt(prompt.clone()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_events_are_extracted_from_binary_noise() {
        let mut body = vec![0x00, 0x00, 0x01, 0x0b, 0xde];
        body.extend_from_slice(b"{\"content\":\"pong\"}");
        body.extend_from_slice(&[0x07, 0xff]);
        let events = scan_assistant_events(&body);
        assert_eq!(events, vec![AssistantEvent::Content("pong".to_string())]);
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let body = br#"{"content":"a } inside \" and {"}"#;
        let events = scan_assistant_events(body);
        assert_eq!(
            events,
            vec![AssistantEvent::Content("a } inside \" and {".to_string())]
        );
    }

    #[test]
    fn tool_use_sequence_is_classified() {
        let body = concat!(
            r#"{"name":"read_file","toolUseId":"tu_1"}"#,
            r#"{"input":"{\"pa"}"#,
            r#"{"input":"th\":1}"}"#,
            r#"{"stop":true}"#,
        );
        let events = scan_assistant_events(body.as_bytes());
        assert_eq!(
            events,
            vec![
                AssistantEvent::ToolUseStart {
                    id: Some("tu_1".to_string()),
                    name: "read_file".to_string()
                },
                AssistantEvent::ToolUseInput("{\"pa".to_string()),
                AssistantEvent::ToolUseInput("th\":1}".to_string()),
                AssistantEvent::ToolUseStop,
            ]
        );
    }

    #[test]
    fn objects_split_across_chunks_are_reassembled() {
        let mut scanner = AssistantEventScanner::new();
        assert!(scanner.push(b"\x00\x01{\"content\":\"Hel").is_empty());
        let events = scanner.push(b"lo\"}\x00");
        assert_eq!(events, vec![AssistantEvent::Content("Hello".to_string())]);
    }

    #[test]
    fn followup_prompts_are_surfaced_separately() {
        let body = br#"{"followupPrompt":{"content":"next?"}}"#;
        let events = scan_assistant_events(body);
        assert!(matches!(events[0], AssistantEvent::FollowupPrompt(_)));
    }
}
