mod auth;
mod eventstream;

pub use auth::KiroAuthenticator;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value as JsonValue;

use aiproxy_protocol::Proto;
use aiproxy_protocol::claude::{
    ClaudeRole, ClaudeUsage, ContentBlock, MessageObjectType, MessagesRequest, MessagesResponse,
};
use aiproxy_provider_core::{
    Authenticator, ByteStream, ModelInfo, Provider, ProviderError, ProviderResult, ProviderType,
};
use aiproxy_transform::{NativeRequest, NativeResponse};

use self::eventstream::{AssistantEvent, AssistantEventScanner, scan_assistant_events};

use super::http_client::{SharedClientKind, client_for};
use super::upstream::{error_for_status, map_wreq_error, send_with_auth_retry};

const DEFAULT_REGION: &str = "us-east-1";
const CONTINUE_STUB: &str = "Continue";

/// Public Claude model id → CodeWhisperer model id.
const MODEL_MAP: &[(&str, &str)] = &[
    ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-haiku-4-5", "CLAUDE_HAIKU_4_5_20251001_V1_0"),
    ("claude-3-7-sonnet", "CLAUDE_3_7_SONNET_20250219_V1_0"),
];

pub struct KiroProvider {
    auth: Arc<KiroAuthenticator>,
}

impl KiroProvider {
    pub fn new(auth: Arc<KiroAuthenticator>) -> Self {
        Self { auth }
    }

    async fn base_url(&self) -> String {
        let region = self
            .auth
            .region()
            .await
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        format!("https://codewhisperer.{region}.amazonaws.com")
    }

    fn apply_headers(&self, builder: wreq::RequestBuilder, token: &str) -> wreq::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/x-amz-json-1.0")
            .header("Accept", "application/json")
    }
}

#[async_trait]
impl Provider for KiroProvider {
    fn name(&self) -> ProviderType {
        ProviderType::Kiro
    }

    fn protocol(&self) -> Proto {
        Proto::Claude
    }

    fn supported_models(&self) -> Vec<String> {
        MODEL_MAP.iter().map(|(id, _)| id.to_string()).collect()
    }

    fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.auth.clone()
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
        Ok(MODEL_MAP
            .iter()
            .map(|(id, _)| ModelInfo::new(*id))
            .collect())
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &NativeRequest,
    ) -> ProviderResult<NativeResponse> {
        let NativeRequest::Claude(request) = request else {
            return Err(ProviderError::InvalidConfig(
                "kiro driver expects a claude-shaped request".to_string(),
            ));
        };
        let envelope = build_conversation_state(model, request)?;
        let body =
            serde_json::to_vec(&envelope).map_err(|err| ProviderError::Other(err.to_string()))?;
        let url = format!("{}/generateAssistantResponse", self.base_url().await);
        let client = client_for(SharedClientKind::NonStream)?;
        let resp = send_with_auth_retry(&(self.auth.clone() as Arc<dyn Authenticator>), |token| {
            self.apply_headers(client.post(&url), token).body(body.clone())
        })
        .await?;

        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(map_wreq_error)?;
        if !(200..300).contains(&status) {
            return Err(error_for_status(status, &bytes));
        }
        let events = scan_assistant_events(&bytes);
        Ok(NativeResponse::Claude(fold_events(events, model)))
    }

    async fn generate_content_stream(
        &self,
        model: &str,
        request: &NativeRequest,
    ) -> ProviderResult<ByteStream> {
        let NativeRequest::Claude(request) = request else {
            return Err(ProviderError::InvalidConfig(
                "kiro driver expects a claude-shaped request".to_string(),
            ));
        };
        let envelope = build_conversation_state(model, request)?;
        let body =
            serde_json::to_vec(&envelope).map_err(|err| ProviderError::Other(err.to_string()))?;
        let url = format!("{}/SendMessageStreaming", self.base_url().await);
        let client = client_for(SharedClientKind::Stream)?;
        let resp = send_with_auth_retry(&(self.auth.clone() as Arc<dyn Authenticator>), |token| {
            self.apply_headers(client.post(&url), token).body(body.clone())
        })
        .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let bytes = resp.bytes().await.map_err(map_wreq_error)?;
            return Err(error_for_status(status, &bytes));
        }
        Ok(sse_from_event_stream(resp, model))
    }
}

pub(crate) fn map_model_id(model: &str) -> String {
    MODEL_MAP
        .iter()
        .find(|(id, _)| *id == model)
        .map(|(_, mapped)| mapped.to_string())
        .unwrap_or_else(|| model.to_string())
}

/// Build the CodeWhisperer `conversationState` envelope.
///
/// The system prompt is prepended to the first user message (or becomes a
/// synthetic first user message). Intermediate turns land in `history`; the
/// last message becomes `currentMessage`, with a "Continue" stub when the
/// conversation ends on an assistant turn.
pub(crate) fn build_conversation_state(
    model: &str,
    request: &MessagesRequest,
) -> ProviderResult<JsonValue> {
    if request.messages.is_empty() {
        return Err(ProviderError::InvalidConfig(
            "messages must not be empty".to_string(),
        ));
    }
    let model_id = map_model_id(model);
    let system_text = request.system.as_ref().map(|system| system.as_text());

    let mut turns: Vec<(ClaudeRole, String)> = request
        .messages
        .iter()
        .map(|message| (message.role, message.content.as_text()))
        .collect();

    if let Some(system) = system_text.filter(|text| !text.is_empty()) {
        if turns[0].0 == ClaudeRole::User {
            let combined = format!("{system}\n\n{}", turns[0].1);
            turns[0].1 = combined;
        } else {
            turns.insert(0, (ClaudeRole::User, system));
        }
    }

    let (last_role, last_text) = turns.last().cloned().expect("turns non-empty");
    let (history_turns, current_text) = if last_role == ClaudeRole::Assistant {
        (turns.as_slice(), CONTINUE_STUB.to_string())
    } else {
        (&turns[..turns.len() - 1], last_text)
    };

    let history: Vec<JsonValue> = history_turns
        .iter()
        .map(|(role, text)| match role {
            ClaudeRole::User => serde_json::json!({
                "userInputMessage": {
                    "content": text,
                    "modelId": model_id,
                    "origin": "AI_EDITOR",
                }
            }),
            ClaudeRole::Assistant => serde_json::json!({
                "assistantResponseMessage": {"content": text}
            }),
        })
        .collect();

    Ok(serde_json::json!({
        "conversationState": {
            "chatTriggerType": "MANUAL",
            "conversationId": uuid::Uuid::new_v4().to_string(),
            "currentMessage": {
                "userInputMessage": {
                    "content": current_text,
                    "modelId": model_id,
                    "origin": "AI_EDITOR",
                }
            },
            "history": history,
        }
    }))
}

struct ToolUseState {
    id: String,
    name: String,
    input_json: String,
}

/// Fold scanned assistant events into one Claude messages response.
pub(crate) fn fold_events(events: Vec<AssistantEvent>, model: &str) -> MessagesResponse {
    let mut text = String::new();
    let mut tools: Vec<ContentBlock> = Vec::new();
    let mut open_tool: Option<ToolUseState> = None;

    for event in events {
        match event {
            AssistantEvent::Content(chunk) => text.push_str(&chunk),
            AssistantEvent::ToolUseStart { id, name } => {
                if let Some(done) = open_tool.take() {
                    tools.push(finish_tool(done));
                }
                open_tool = Some(ToolUseState {
                    id: id.unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple())),
                    name,
                    input_json: String::new(),
                });
            }
            AssistantEvent::ToolUseInput(fragment) => {
                if let Some(tool) = open_tool.as_mut() {
                    tool.input_json.push_str(&fragment);
                }
            }
            AssistantEvent::ToolUseStop => {
                if let Some(done) = open_tool.take() {
                    tools.push(finish_tool(done));
                }
            }
            AssistantEvent::FollowupPrompt(_) => {}
        }
    }
    if let Some(done) = open_tool.take() {
        tools.push(finish_tool(done));
    }

    let has_tools = !tools.is_empty();
    let mut content = Vec::new();
    if !text.is_empty() || !has_tools {
        content.push(ContentBlock::Text { text });
    }
    content.extend(tools);

    MessagesResponse {
        id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
        object: MessageObjectType::Message,
        role: ClaudeRole::Assistant,
        content,
        model: Some(model.to_string()),
        stop_reason: Some(if has_tools { "tool_use" } else { "end_turn" }.to_string()),
        stop_sequence: None,
        usage: Some(ClaudeUsage::default()),
    }
}

fn finish_tool(state: ToolUseState) -> ContentBlock {
    let input = serde_json::from_str::<JsonValue>(&state.input_json)
        .unwrap_or(JsonValue::String(state.input_json));
    ContentBlock::ToolUse {
        id: state.id,
        name: state.name,
        input,
    }
}

/// Re-emit a CodeWhisperer event-stream body as Anthropic-style SSE frames.
/// A read-idle timeout or transport failure ends the stream with an `Err`
/// item instead of a fabricated clean termination.
fn sse_from_event_stream(resp: wreq::Response, model: &str) -> ByteStream {
    let idle = super::http_client::settings().read_timeout;
    let model = model.to_string();
    let (tx, rx) = tokio::sync::mpsc::channel::<ProviderResult<Bytes>>(16);

    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        let mut scanner = AssistantEventScanner::new();
        let mut writer = SseEventWriter::new(tx.clone(), model);

        if !writer.message_start().await {
            return;
        }
        loop {
            let next = tokio::time::timeout(idle, stream.next()).await;
            let item = match next {
                Ok(item) => item,
                Err(_) => {
                    let _ = tx
                        .send(Err(ProviderError::NetworkTimeout(format!(
                            "no upstream data for {}s",
                            idle.as_secs()
                        ))))
                        .await;
                    return;
                }
            };
            let Some(item) = item else {
                break;
            };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = tx.send(Err(map_wreq_error(err))).await;
                    return;
                }
            };
            for event in scanner.push(&chunk) {
                if !writer.emit(event).await {
                    return;
                }
            }
        }
        writer.finish().await;
    });

    rx
}

struct SseEventWriter {
    tx: tokio::sync::mpsc::Sender<ProviderResult<Bytes>>,
    model: String,
    next_index: i64,
    text_open: bool,
    tool_open: bool,
    saw_tool: bool,
}

impl SseEventWriter {
    fn new(tx: tokio::sync::mpsc::Sender<ProviderResult<Bytes>>, model: String) -> Self {
        Self {
            tx,
            model,
            next_index: 0,
            text_open: false,
            tool_open: false,
            saw_tool: false,
        }
    }

    async fn send(&self, kind: &str, payload: JsonValue) -> bool {
        let frame = format!("event: {kind}\ndata: {payload}\n\n");
        self.tx.send(Ok(Bytes::from(frame))).await.is_ok()
    }

    async fn message_start(&self) -> bool {
        self.send(
            "message_start",
            serde_json::json!({
                "type": "message_start",
                "message": {
                    "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                }
            }),
        )
        .await
    }

    async fn emit(&mut self, event: AssistantEvent) -> bool {
        match event {
            AssistantEvent::Content(text) => {
                if !self.text_open {
                    self.text_open = true;
                    let index = self.next_index;
                    self.next_index += 1;
                    let ok = self
                        .send(
                            "content_block_start",
                            serde_json::json!({
                                "type": "content_block_start",
                                "index": index,
                                "content_block": {"type": "text", "text": ""},
                            }),
                        )
                        .await;
                    if !ok {
                        return false;
                    }
                }
                self.send(
                    "content_block_delta",
                    serde_json::json!({
                        "type": "content_block_delta",
                        "index": self.next_index - 1,
                        "delta": {"type": "text_delta", "text": text},
                    }),
                )
                .await
            }
            AssistantEvent::ToolUseStart { id, name } => {
                self.saw_tool = true;
                self.tool_open = true;
                let index = self.next_index;
                self.next_index += 1;
                self.send(
                    "content_block_start",
                    serde_json::json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": {
                            "type": "tool_use",
                            "id": id.unwrap_or_else(|| {
                                format!("toolu_{}", uuid::Uuid::new_v4().simple())
                            }),
                            "name": name,
                            "input": {},
                        },
                    }),
                )
                .await
            }
            AssistantEvent::ToolUseInput(fragment) => {
                self.send(
                    "content_block_delta",
                    serde_json::json!({
                        "type": "content_block_delta",
                        "index": self.next_index - 1,
                        "delta": {"type": "input_json_delta", "partial_json": fragment},
                    }),
                )
                .await
            }
            AssistantEvent::ToolUseStop => {
                self.tool_open = false;
                self.send(
                    "content_block_stop",
                    serde_json::json!({
                        "type": "content_block_stop",
                        "index": self.next_index - 1,
                    }),
                )
                .await
            }
            AssistantEvent::FollowupPrompt(_) => true,
        }
    }

    async fn finish(&mut self) {
        if self.text_open || self.tool_open {
            let _ = self
                .send(
                    "content_block_stop",
                    serde_json::json!({
                        "type": "content_block_stop",
                        "index": self.next_index - 1,
                    }),
                )
                .await;
        }
        let stop_reason = if self.saw_tool { "tool_use" } else { "end_turn" };
        let _ = self
            .send(
                "message_delta",
                serde_json::json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": stop_reason},
                    "usage": {"output_tokens": 0},
                }),
            )
            .await;
        let _ = self
            .send(
                "message_stop",
                serde_json::json!({"type": "message_stop"}),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_protocol::claude::{ClaudeMessage, ClaudeMessageContent};

    fn message(role: ClaudeRole, text: &str) -> ClaudeMessage {
        ClaudeMessage {
            role,
            content: ClaudeMessageContent::Text(text.to_string()),
        }
    }

    fn request(messages: Vec<ClaudeMessage>, system: Option<&str>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-sonnet-4-5".to_string(),
            messages,
            max_tokens: 16,
            system: system.map(|text| {
                aiproxy_protocol::claude::SystemParam::Text(text.to_string())
            }),
            temperature: None,
            top_p: None,
            stream: None,
            stop_sequences: None,
            tools: None,
        }
    }

    #[test]
    fn single_user_message_becomes_current_message() {
        let envelope = build_conversation_state(
            "claude-sonnet-4-5",
            &request(vec![message(ClaudeRole::User, "ping")], None),
        )
        .expect("envelope");
        let state = &envelope["conversationState"];
        assert_eq!(
            state["currentMessage"]["userInputMessage"]["content"],
            "ping"
        );
        assert_eq!(
            state["currentMessage"]["userInputMessage"]["modelId"],
            "CLAUDE_SONNET_4_5_20250929_V1_0"
        );
        assert_eq!(state["history"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn system_prompt_is_prepended_to_the_first_user_message() {
        let envelope = build_conversation_state(
            "claude-sonnet-4-5",
            &request(
                vec![
                    message(ClaudeRole::User, "hi"),
                    message(ClaudeRole::Assistant, "hello"),
                    message(ClaudeRole::User, "ping"),
                ],
                Some("be terse"),
            ),
        )
        .expect("envelope");
        let history = envelope["conversationState"]["history"]
            .as_array()
            .unwrap();
        assert_eq!(
            history[0]["userInputMessage"]["content"],
            "be terse\n\nhi"
        );
        assert_eq!(history[1]["assistantResponseMessage"]["content"], "hello");
        assert_eq!(
            envelope["conversationState"]["currentMessage"]["userInputMessage"]["content"],
            "ping"
        );
    }

    #[test]
    fn assistant_last_message_yields_a_continue_stub() {
        let envelope = build_conversation_state(
            "claude-sonnet-4-5",
            &request(
                vec![
                    message(ClaudeRole::User, "hi"),
                    message(ClaudeRole::Assistant, "partial answer"),
                ],
                None,
            ),
        )
        .expect("envelope");
        let state = &envelope["conversationState"];
        assert_eq!(
            state["currentMessage"]["userInputMessage"]["content"],
            "Continue"
        );
        assert_eq!(state["history"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn empty_messages_are_rejected() {
        assert!(build_conversation_state("claude-sonnet-4-5", &request(vec![], None)).is_err());
    }

    #[test]
    fn folded_content_event_matches_the_messages_shape() {
        let response = fold_events(
            vec![AssistantEvent::Content("pong".to_string())],
            "claude-sonnet-4-5",
        );
        assert!(response.id.starts_with("msg_"));
        assert_eq!(response.role, ClaudeRole::Assistant);
        assert_eq!(
            response.content,
            vec![ContentBlock::Text {
                text: "pong".to_string()
            }]
        );
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn tool_use_events_fold_into_blocks_and_flip_stop_reason() {
        let response = fold_events(
            vec![
                AssistantEvent::Content("let me check".to_string()),
                AssistantEvent::ToolUseStart {
                    id: Some("tu_1".to_string()),
                    name: "read_file".to_string(),
                },
                AssistantEvent::ToolUseInput("{\"path\":".to_string()),
                AssistantEvent::ToolUseInput("\"a.txt\"}".to_string()),
                AssistantEvent::ToolUseStop,
            ],
            "claude-sonnet-4-5",
        );
        assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(response.content.len(), 2);
        match &response.content[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "tu_1");
                assert_eq!(name, "read_file");
                assert_eq!(input["path"], "a.txt");
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }
}
