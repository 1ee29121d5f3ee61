use aiproxy_protocol::claude::{ContentBlock, MessagesResponse};
use aiproxy_protocol::openai::{
    ChatCompletionChoice, ChatCompletionObjectType, ChatCompletionResponse, ChatResponseMessage,
    ChatRole, CompletionUsage,
};

use crate::epoch_seconds;

use super::map_stop_reason;

/// Convert a Claude messages response into an OpenAI chat completion.
pub fn transform_response(response: MessagesResponse, model: &str) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in &response.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(serde_json::json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": input.to_string(),
                    }
                }));
            }
            ContentBlock::ToolResult { .. } => {}
        }
    }

    let finish_reason = response
        .stop_reason
        .as_deref()
        .map(|reason| map_stop_reason(reason).to_string());

    let usage = response.usage.map(|usage| CompletionUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
    });

    ChatCompletionResponse {
        id: response.id,
        object: ChatCompletionObjectType::ChatCompletion,
        created: epoch_seconds(),
        model: response.model.unwrap_or_else(|| model.to_string()),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatResponseMessage {
                role: ChatRole::Assistant,
                content: Some(text),
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason,
        }],
        usage,
    }
}
