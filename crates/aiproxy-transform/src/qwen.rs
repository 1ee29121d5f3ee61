use aiproxy_protocol::Proto;
use aiproxy_protocol::openai::{
    ChatCompletionChoice, ChatCompletionChunk, ChatCompletionObjectType, ChatCompletionRequest,
    ChatCompletionResponse, ChatResponseMessage, ChatRole, CompletionUsage,
};
use aiproxy_protocol::qwen::{QwenChatResponse, QwenUsage};

use crate::{Converter, NativeRequest, NativeResponse, NativeStreamEvent, TransformError, epoch_seconds};

/// Qwen speaks OpenAI chat completions on the wire, but DashScope deployments
/// sometimes nest the payload under `output` and emit float token counts.
/// Requests pass through unchanged; responses are normalized.
pub struct QwenConverter;

impl Converter for QwenConverter {
    fn protocol(&self) -> Proto {
        Proto::Qwen
    }

    fn from_openai_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<NativeRequest, TransformError> {
        Ok(NativeRequest::OpenAI(request.clone()))
    }

    fn to_openai_response(
        &self,
        response: NativeResponse,
        model: &str,
    ) -> Result<ChatCompletionResponse, TransformError> {
        match response {
            NativeResponse::Qwen(resp) => Ok(normalize_response(resp, model)),
            NativeResponse::OpenAI(resp) => Ok(resp),
            other => Err(TransformError::ProtoMismatch {
                expected: Proto::Qwen,
                got: other.kind(),
            }),
        }
    }

    fn to_openai_stream_chunk(
        &self,
        event: NativeStreamEvent,
        _model: &str,
    ) -> Result<Option<ChatCompletionChunk>, TransformError> {
        match event {
            NativeStreamEvent::OpenAI(chunk) => Ok(Some(chunk)),
            other => Err(TransformError::ProtoMismatch {
                expected: Proto::Qwen,
                got: other.kind(),
            }),
        }
    }
}

pub fn normalize_response(mut response: QwenChatResponse, model: &str) -> ChatCompletionResponse {
    let choices = response
        .take_choices()
        .into_iter()
        .map(|choice| {
            let message = choice.message.unwrap_or_default();
            ChatCompletionChoice {
                index: choice.index,
                message: ChatResponseMessage {
                    role: ChatRole::Assistant,
                    content: message.content,
                    tool_calls: message.tool_calls,
                },
                finish_reason: choice.finish_reason,
            }
        })
        .collect();

    let usage = response.take_usage().map(usage_to_openai);

    ChatCompletionResponse {
        id: response
            .id
            .unwrap_or_else(|| format!("chatcmpl-{}", epoch_seconds())),
        object: ChatCompletionObjectType::ChatCompletion,
        created: response.created.unwrap_or_else(epoch_seconds),
        model: response.model.unwrap_or_else(|| model.to_string()),
        choices,
        usage,
    }
}

fn usage_to_openai(usage: QwenUsage) -> CompletionUsage {
    CompletionUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_top_level_shape() {
        let raw = serde_json::json!({
            "id": "chatcmpl-abc",
            "choices": [{"index": 0,
                         "message": {"role": "assistant", "content": "Hello"},
                         "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        });
        let resp: QwenChatResponse = serde_json::from_value(raw).expect("parses");
        let out = normalize_response(resp, "qwen3-coder-plus");
        assert_eq!(out.id, "chatcmpl-abc");
        assert_eq!(out.choices[0].message.content.as_deref(), Some("Hello"));
        assert_eq!(out.choices[0].finish_reason.as_deref(), Some("stop"));
        let usage = out.usage.expect("usage present");
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(usage.completion_tokens, 1);
        assert_eq!(usage.total_tokens, 6);
    }

    #[test]
    fn normalizes_nested_output_shape_and_stamps_model() {
        let raw = serde_json::json!({
            "output": {
                "choices": [{"message": {"role": "assistant", "content": "ok"},
                             "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 2.0, "completion_tokens": 1.0, "total_tokens": 3.0}
            }
        });
        let resp: QwenChatResponse = serde_json::from_value(raw).expect("parses");
        let out = normalize_response(resp, "qwen3-coder-plus");
        assert_eq!(out.model, "qwen3-coder-plus");
        assert_eq!(out.choices.len(), 1);
        assert_eq!(out.usage.expect("usage").total_tokens, 3);
    }
}
