use aiproxy_protocol::Proto;
use aiproxy_protocol::openai::{
    ChatCompletionChoice, ChatCompletionChunk, ChatCompletionChunkObjectType,
    ChatCompletionObjectType, ChatCompletionRequest, ChatCompletionResponse, ChatResponseMessage,
    ChatRole, ChatStreamChoice, ChatStreamDelta, CompletionUsage,
};
use serde_json::Value as JsonValue;

use crate::{
    Converter, NativeRequest, NativeResponse, NativeStreamEvent, TransformError, epoch_seconds,
};

/// The native `/gemini/*` handlers pass bodies straight through, so this
/// converter only exists for the OpenAI-compatible surface routed at a
/// Gemini-protocol provider: requests are rebuilt as `contents`, responses
/// and stream chunks are read out of `candidates`.
pub struct GeminiConverter;

impl Converter for GeminiConverter {
    fn protocol(&self) -> Proto {
        Proto::Gemini
    }

    fn from_openai_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<NativeRequest, TransformError> {
        Ok(NativeRequest::Gemini(build_generate_request(request)))
    }

    fn to_openai_response(
        &self,
        response: NativeResponse,
        model: &str,
    ) -> Result<ChatCompletionResponse, TransformError> {
        match response {
            NativeResponse::Gemini(value) => Ok(response_from_value(&value, model)),
            other => Err(TransformError::ProtoMismatch {
                expected: Proto::Gemini,
                got: other.kind(),
            }),
        }
    }

    fn to_openai_stream_chunk(
        &self,
        event: NativeStreamEvent,
        model: &str,
    ) -> Result<Option<ChatCompletionChunk>, TransformError> {
        match event {
            NativeStreamEvent::Gemini(value) => Ok(Some(chunk_from_value(&value, model))),
            other => Err(TransformError::ProtoMismatch {
                expected: Proto::Gemini,
                got: other.kind(),
            }),
        }
    }
}

fn build_generate_request(
    request: &ChatCompletionRequest,
) -> aiproxy_protocol::gemini::GenerateContentRequest {
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();
    for message in &request.messages {
        let text = message
            .content
            .as_ref()
            .map(|content| content.as_text())
            .unwrap_or_default();
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            ChatRole::Assistant => contents.push(serde_json::json!({
                "role": "model",
                "parts": [{"text": text}],
            })),
            ChatRole::User | ChatRole::Tool => contents.push(serde_json::json!({
                "role": "user",
                "parts": [{"text": text}],
            })),
        }
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(temperature) = request.temperature {
        generation_config.insert("temperature".to_string(), serde_json::json!(temperature));
    }
    if let Some(top_p) = request.top_p {
        generation_config.insert("topP".to_string(), serde_json::json!(top_p));
    }
    if let Some(max_tokens) = request.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), serde_json::json!(max_tokens));
    }

    aiproxy_protocol::gemini::GenerateContentRequest {
        contents: Some(JsonValue::Array(contents)),
        system_instruction: if system_texts.is_empty() {
            None
        } else {
            Some(serde_json::json!({"parts": [{"text": system_texts.join("\n")}]}))
        },
        generation_config: if generation_config.is_empty() {
            None
        } else {
            Some(JsonValue::Object(generation_config))
        },
        safety_settings: None,
        tools: None,
        tool_config: None,
        extra: serde_json::Map::new(),
    }
}

fn candidate_text(value: &JsonValue) -> String {
    let Some(parts) = value
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    else {
        return String::new();
    };
    parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("")
}

fn map_finish_reason(value: &JsonValue) -> Option<String> {
    let reason = value
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("finishReason"))
        .and_then(|r| r.as_str())?;
    let mapped = match reason {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        _ => "stop",
    };
    Some(mapped.to_string())
}

fn usage_from_value(value: &JsonValue) -> Option<CompletionUsage> {
    let metadata = value.get("usageMetadata")?;
    let prompt = metadata.get("promptTokenCount").and_then(|v| v.as_i64());
    let candidates = metadata
        .get("candidatesTokenCount")
        .and_then(|v| v.as_i64());
    let total = metadata.get("totalTokenCount").and_then(|v| v.as_i64());
    Some(CompletionUsage {
        prompt_tokens: prompt.unwrap_or(0),
        completion_tokens: candidates.unwrap_or(0),
        total_tokens: total.unwrap_or(prompt.unwrap_or(0) + candidates.unwrap_or(0)),
    })
}

fn response_from_value(value: &JsonValue, model: &str) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", epoch_seconds()),
        object: ChatCompletionObjectType::ChatCompletion,
        created: epoch_seconds(),
        model: model.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatResponseMessage {
                role: ChatRole::Assistant,
                content: Some(candidate_text(value)),
                tool_calls: None,
            },
            finish_reason: map_finish_reason(value).or_else(|| Some("stop".to_string())),
        }],
        usage: usage_from_value(value),
    }
}

fn chunk_from_value(value: &JsonValue, model: &str) -> ChatCompletionChunk {
    let text = candidate_text(value);
    ChatCompletionChunk {
        id: format!("chatcmpl-{}", epoch_seconds()),
        object: ChatCompletionChunkObjectType::ChatCompletionChunk,
        created: epoch_seconds(),
        model: model.to_string(),
        choices: vec![ChatStreamChoice {
            index: 0,
            delta: ChatStreamDelta {
                content: if text.is_empty() { None } else { Some(text) },
                ..Default::default()
            },
            finish_reason: map_finish_reason(value),
        }],
        usage: usage_from_value(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_protocol::openai::{ChatMessage, MessageContent};

    #[test]
    fn openai_request_maps_to_contents_and_system_instruction() {
        let request = ChatCompletionRequest {
            model: "gemini-2.5-pro".to_string(),
            messages: vec![
                ChatMessage {
                    role: ChatRole::System,
                    content: Some(MessageContent::Text("be brief".to_string())),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                },
                ChatMessage {
                    role: ChatRole::User,
                    content: Some(MessageContent::Text("hi".to_string())),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                },
            ],
            temperature: Some(0.3),
            top_p: None,
            max_tokens: Some(256),
            stream: None,
            stream_options: None,
            stop: None,
            tools: None,
            tool_choice: None,
        };
        let native = build_generate_request(&request);
        let contents = native.contents.expect("contents");
        assert_eq!(contents[0]["role"], "user");
        assert!(native.system_instruction.is_some());
        let config = native.generation_config.expect("generation config");
        assert_eq!(config["maxOutputTokens"], 256);
    }

    #[test]
    fn candidate_text_and_usage_are_extracted() {
        let value = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "Hel"}, {"text": "lo"}]},
                            "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2,
                              "totalTokenCount": 5}
        });
        let out = response_from_value(&value, "gemini-2.5-pro");
        assert_eq!(out.choices[0].message.content.as_deref(), Some("Hello"));
        assert_eq!(out.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(out.usage.expect("usage").total_tokens, 5);
    }
}
