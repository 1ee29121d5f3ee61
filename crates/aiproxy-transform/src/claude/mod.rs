pub mod request;
pub mod response;
pub mod stream;

use aiproxy_protocol::Proto;
use aiproxy_protocol::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};

use crate::{Converter, NativeRequest, NativeResponse, NativeStreamEvent, TransformError};

pub struct ClaudeConverter;

impl Converter for ClaudeConverter {
    fn protocol(&self) -> Proto {
        Proto::Claude
    }

    fn from_openai_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<NativeRequest, TransformError> {
        Ok(NativeRequest::Claude(request::transform_request(request)))
    }

    fn to_openai_response(
        &self,
        response: NativeResponse,
        model: &str,
    ) -> Result<ChatCompletionResponse, TransformError> {
        match response {
            NativeResponse::Claude(resp) => Ok(response::transform_response(resp, model)),
            other => Err(TransformError::ProtoMismatch {
                expected: Proto::Claude,
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
            NativeStreamEvent::Claude(event) => Ok(Some(stream::transform_event(&event, model))),
            other => Err(TransformError::ProtoMismatch {
                expected: Proto::Claude,
                got: other.kind(),
            }),
        }
    }
}

/// Claude `stop_reason` → OpenAI `finish_reason`.
pub(crate) fn map_stop_reason(stop_reason: &str) -> &'static str {
    match stop_reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}
