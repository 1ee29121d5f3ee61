use aiproxy_protocol::Proto;
use aiproxy_protocol::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};

use crate::{Converter, NativeRequest, NativeResponse, NativeStreamEvent, TransformError};

/// Identity converter for providers that already speak OpenAI chat completions.
pub struct OpenAIConverter;

impl Converter for OpenAIConverter {
    fn protocol(&self) -> Proto {
        Proto::OpenAI
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
        _model: &str,
    ) -> Result<ChatCompletionResponse, TransformError> {
        match response {
            NativeResponse::OpenAI(resp) => Ok(resp),
            other => Err(TransformError::ProtoMismatch {
                expected: Proto::OpenAI,
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
                expected: Proto::OpenAI,
                got: other.kind(),
            }),
        }
    }
}
