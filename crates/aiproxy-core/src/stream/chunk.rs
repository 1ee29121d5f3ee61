use serde_json::Value as JsonValue;

use aiproxy_protocol::sse::{DATA_PREFIX, DONE_PAYLOAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Data,
    Done,
    Malformed,
    Empty,
    /// A line that is not a `data:` field (comments, `event:` fields);
    /// forwarded verbatim.
    Unknown,
}

/// One classified SSE line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChunk {
    pub kind: ChunkKind,
    pub raw_line: String,
    /// Payload after `data: ` for data lines.
    pub content: String,
    pub has_content: bool,
    /// `choices[0].delta.content` when present.
    pub content_text: Option<String>,
    pub metadata: Option<JsonValue>,
    pub error: Option<String>,
}

impl ParsedChunk {
    pub fn parse(line: &str) -> Self {
        if line.trim().is_empty() {
            return Self::of_kind(ChunkKind::Empty, line);
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return Self::of_kind(ChunkKind::Unknown, line);
        };
        let payload = payload.trim();
        if payload == DONE_PAYLOAD {
            return Self {
                kind: ChunkKind::Done,
                raw_line: line.to_string(),
                content: payload.to_string(),
                has_content: false,
                content_text: None,
                metadata: None,
                error: None,
            };
        }
        match serde_json::from_str::<JsonValue>(payload) {
            Ok(decoded) => {
                let content_text = extract_content_text(&decoded);
                Self {
                    kind: ChunkKind::Data,
                    raw_line: line.to_string(),
                    content: payload.to_string(),
                    has_content: content_text.as_deref().is_some_and(|t| !t.is_empty()),
                    content_text,
                    metadata: Some(decoded),
                    error: None,
                }
            }
            Err(err) => Self {
                kind: ChunkKind::Malformed,
                raw_line: line.to_string(),
                content: payload.to_string(),
                has_content: false,
                content_text: None,
                metadata: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Whether the decoded payload is a JSON object (anything else cannot be
    /// a delta chunk).
    pub fn is_object(&self) -> bool {
        self.metadata.as_ref().is_some_and(|decoded| decoded.is_object())
    }

    fn of_kind(kind: ChunkKind, line: &str) -> Self {
        Self {
            kind,
            raw_line: line.to_string(),
            content: String::new(),
            has_content: false,
            content_text: None,
            metadata: None,
            error: None,
        }
    }
}

fn extract_content_text(decoded: &JsonValue) -> Option<String> {
    decoded
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|text| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_empty() {
        assert_eq!(ParsedChunk::parse("").kind, ChunkKind::Empty);
        assert_eq!(ParsedChunk::parse("   ").kind, ChunkKind::Empty);
    }

    #[test]
    fn non_data_lines_are_unknown() {
        let chunk = ParsedChunk::parse("event: message_start");
        assert_eq!(chunk.kind, ChunkKind::Unknown);
        assert_eq!(chunk.raw_line, "event: message_start");
    }

    #[test]
    fn done_marker_is_detected() {
        assert_eq!(ParsedChunk::parse("data: [DONE]").kind, ChunkKind::Done);
    }

    #[test]
    fn content_text_is_extracted_from_the_first_choice_delta() {
        let chunk =
            ParsedChunk::parse(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#);
        assert_eq!(chunk.kind, ChunkKind::Data);
        assert!(chunk.has_content);
        assert_eq!(chunk.content_text.as_deref(), Some("Hello"));
    }

    #[test]
    fn role_only_deltas_have_no_content() {
        let chunk =
            ParsedChunk::parse(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#);
        assert_eq!(chunk.kind, ChunkKind::Data);
        assert!(!chunk.has_content);
        assert_eq!(chunk.content_text, None);
    }

    #[test]
    fn non_object_payloads_parse_but_are_not_objects() {
        let chunk = ParsedChunk::parse("data: [1,2,3]");
        assert_eq!(chunk.kind, ChunkKind::Data);
        assert!(!chunk.is_object());
        assert!(!chunk.has_content);
    }

    #[test]
    fn invalid_json_is_malformed_with_an_error() {
        let chunk = ParsedChunk::parse("data: {\"choices\":[");
        assert_eq!(chunk.kind, ChunkKind::Malformed);
        assert!(chunk.error.is_some());
    }
}
