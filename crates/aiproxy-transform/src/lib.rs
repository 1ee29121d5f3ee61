//! Bidirectional format translation between the OpenAI-compatible downstream
//! surface and each upstream protocol.
//!
//! One converter per [`Proto`]; the handler picks it by the routed provider's
//! declared protocol. OpenAI is the identity, Qwen normalizes the DashScope
//! response shapes, Claude maps requests/responses/stream events, and Gemini
//! is identity at this boundary (the native handlers pass bodies through).

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod qwen;

use aiproxy_protocol::Proto;
use aiproxy_protocol::claude::{MessagesRequest, MessagesResponse, MessagesStreamEvent};
use aiproxy_protocol::gemini::GenerateContentRequest;
use aiproxy_protocol::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use aiproxy_protocol::qwen::QwenChatResponse;

use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    ProtoMismatch { expected: Proto, got: &'static str },
    MissingField(&'static str),
    Malformed(String),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::ProtoMismatch { expected, got } => {
                write!(f, "converter for {expected} received a {got} payload")
            }
            TransformError::MissingField(field) => write!(f, "missing field: {field}"),
            TransformError::Malformed(msg) => write!(f, "malformed payload: {msg}"),
        }
    }
}

impl Error for TransformError {}

/// A request in the wire dialect of one upstream protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeRequest {
    OpenAI(ChatCompletionRequest),
    Gemini(GenerateContentRequest),
    Claude(MessagesRequest),
}

impl NativeRequest {
    fn kind(&self) -> &'static str {
        match self {
            NativeRequest::OpenAI(_) => "openai",
            NativeRequest::Gemini(_) => "gemini",
            NativeRequest::Claude(_) => "claude",
        }
    }
}

/// A non-stream response as one upstream protocol emitted it.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeResponse {
    OpenAI(ChatCompletionResponse),
    Qwen(QwenChatResponse),
    Gemini(serde_json::Value),
    Claude(MessagesResponse),
}

impl NativeResponse {
    fn kind(&self) -> &'static str {
        match self {
            NativeResponse::OpenAI(_) => "openai",
            NativeResponse::Qwen(_) => "qwen",
            NativeResponse::Gemini(_) => "gemini",
            NativeResponse::Claude(_) => "claude",
        }
    }
}

/// One decoded stream event from an upstream body.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeStreamEvent {
    OpenAI(ChatCompletionChunk),
    Claude(MessagesStreamEvent),
    Gemini(serde_json::Value),
}

impl NativeStreamEvent {
    fn kind(&self) -> &'static str {
        match self {
            NativeStreamEvent::OpenAI(_) => "openai",
            NativeStreamEvent::Claude(_) => "claude",
            NativeStreamEvent::Gemini(_) => "gemini",
        }
    }
}

pub trait Converter: Send + Sync {
    fn protocol(&self) -> Proto;

    fn from_openai_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<NativeRequest, TransformError>;

    fn to_openai_response(
        &self,
        response: NativeResponse,
        model: &str,
    ) -> Result<ChatCompletionResponse, TransformError>;

    /// `None` means the event carries nothing the OpenAI surface can express
    /// and should be dropped (not an error).
    fn to_openai_stream_chunk(
        &self,
        event: NativeStreamEvent,
        model: &str,
    ) -> Result<Option<ChatCompletionChunk>, TransformError>;
}

static OPENAI: openai::OpenAIConverter = openai::OpenAIConverter;
static QWEN: qwen::QwenConverter = qwen::QwenConverter;
static CLAUDE: claude::ClaudeConverter = claude::ClaudeConverter;
static GEMINI: gemini::GeminiConverter = gemini::GeminiConverter;

pub fn converter_for(proto: Proto) -> &'static dyn Converter {
    match proto {
        Proto::OpenAI => &OPENAI,
        Proto::Qwen => &QWEN,
        Proto::Claude => &CLAUDE,
        Proto::Gemini => &GEMINI,
    }
}

pub(crate) fn epoch_seconds() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
