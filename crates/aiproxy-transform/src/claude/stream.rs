use aiproxy_protocol::claude::MessagesStreamEvent;
use aiproxy_protocol::openai::{
    ChatCompletionChunk, ChatCompletionChunkObjectType, ChatRole, ChatStreamChoice,
    ChatStreamDelta,
};

use crate::epoch_seconds;

use super::map_stop_reason;

/// Convert one Anthropic stream event into an OpenAI chunk.
///
/// Events with nothing to say on the OpenAI surface become an empty delta so
/// downstream ordering is preserved.
pub fn transform_event(event: &MessagesStreamEvent, model: &str) -> ChatCompletionChunk {
    let (delta, finish_reason) = match event.kind.as_str() {
        "message_start" => (
            ChatStreamDelta {
                role: Some(ChatRole::Assistant),
                ..Default::default()
            },
            None,
        ),
        "content_block_delta" => {
            let text = event.delta.as_ref().and_then(|delta| delta.text.clone());
            (
                ChatStreamDelta {
                    content: text,
                    ..Default::default()
                },
                None,
            )
        }
        "message_delta" => {
            let finish = event
                .delta
                .as_ref()
                .and_then(|delta| delta.stop_reason.as_deref())
                .map(|reason| map_stop_reason(reason).to_string());
            (ChatStreamDelta::default(), finish)
        }
        "message_stop" => (ChatStreamDelta::default(), Some("stop".to_string())),
        _ => (ChatStreamDelta::default(), None),
    };

    ChatCompletionChunk {
        id: format!("chatcmpl-{}", epoch_seconds()),
        object: ChatCompletionChunkObjectType::ChatCompletionChunk,
        created: epoch_seconds(),
        model: model.to_string(),
        choices: vec![ChatStreamChoice {
            index: 0,
            delta,
            finish_reason,
        }],
        usage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: serde_json::Value) -> MessagesStreamEvent {
        serde_json::from_value(raw).expect("event parses")
    }

    #[test]
    fn message_start_yields_a_role_delta() {
        let chunk = transform_event(
            &event(serde_json::json!({"type": "message_start", "message": {}})),
            "m",
        );
        assert_eq!(chunk.choices[0].delta.role, Some(ChatRole::Assistant));
        assert_eq!(chunk.choices[0].delta.content, None);
    }

    #[test]
    fn content_block_delta_carries_text() {
        let chunk = transform_event(
            &event(serde_json::json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": "Hello"}
            })),
            "m",
        );
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn message_delta_sets_mapped_finish_reason() {
        let chunk = transform_event(
            &event(serde_json::json!({
                "type": "message_delta",
                "delta": {"stop_reason": "max_tokens"}
            })),
            "m",
        );
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn message_stop_finishes_with_stop() {
        let chunk = transform_event(&event(serde_json::json!({"type": "message_stop"})), "m");
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn unknown_events_become_empty_deltas() {
        let chunk = transform_event(&event(serde_json::json!({"type": "ping"})), "m");
        assert_eq!(chunk.choices[0].delta, ChatStreamDelta::default());
        assert_eq!(chunk.choices[0].finish_reason, None);
    }
}
