use aiproxy_protocol::claude::{
    ClaudeMessage, ClaudeMessageContent, ClaudeRole, MessagesRequest, SystemParam,
};
use aiproxy_protocol::openai::{ChatCompletionRequest, ChatMessage, ChatRole};

const DEFAULT_MAX_TOKENS: i64 = 4096;

/// Convert an OpenAI chat-completions request into a Claude messages request.
///
/// `system`/`developer` entries are concatenated into the `system` parameter;
/// everything else keeps its role. Tool-result messages have no Claude role of
/// their own and are folded into user turns.
pub fn transform_request(request: &ChatCompletionRequest) -> MessagesRequest {
    let mut system_texts = Vec::new();
    let mut messages = Vec::new();

    for message in &request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(content) = &message.content {
                    let text = content.as_text();
                    if !text.is_empty() {
                        system_texts.push(text);
                    }
                }
            }
            ChatRole::Assistant => messages.push(map_message(message, ClaudeRole::Assistant)),
            ChatRole::User | ChatRole::Tool => {
                messages.push(map_message(message, ClaudeRole::User));
            }
        }
    }

    let system = if system_texts.is_empty() {
        None
    } else {
        Some(SystemParam::Text(system_texts.join("\n")))
    };

    MessagesRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        temperature: request.temperature,
        top_p: request.top_p,
        stream: request.stream,
        stop_sequences: None,
        tools: request.tools.clone(),
    }
}

fn map_message(message: &ChatMessage, role: ClaudeRole) -> ClaudeMessage {
    let text = message
        .content
        .as_ref()
        .map(|content| content.as_text())
        .unwrap_or_default();
    ClaudeMessage {
        role,
        content: ClaudeMessageContent::Text(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_protocol::openai::MessageContent;

    fn chat_message(role: ChatRole, text: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: Some(MessageContent::Text(text.to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn system_entries_are_segregated_and_joined() {
        let request = ChatCompletionRequest {
            model: "claude-sonnet-4-5".to_string(),
            messages: vec![
                chat_message(ChatRole::System, "be terse"),
                chat_message(ChatRole::System, "answer in english"),
                chat_message(ChatRole::User, "hi"),
            ],
            temperature: Some(0.5),
            top_p: Some(0.9),
            max_tokens: None,
            stream: Some(false),
            stream_options: None,
            stop: None,
            tools: None,
            tool_choice: None,
        };
        let native = transform_request(&request);
        match native.system {
            Some(SystemParam::Text(text)) => assert_eq!(text, "be terse\nanswer in english"),
            other => panic!("unexpected system param: {other:?}"),
        }
        assert_eq!(native.messages.len(), 1);
        assert_eq!(native.max_tokens, 4096);
        assert_eq!(native.temperature, Some(0.5));
        assert_eq!(native.top_p, Some(0.9));
    }

    #[test]
    fn round_trip_preserves_core_fields() {
        let request = ChatCompletionRequest {
            model: "claude-sonnet-4-5".to_string(),
            messages: vec![chat_message(ChatRole::User, "ping")],
            temperature: Some(0.2),
            top_p: None,
            max_tokens: Some(128),
            stream: Some(true),
            stream_options: None,
            stop: None,
            tools: None,
            tool_choice: None,
        };
        let native = transform_request(&request);
        assert_eq!(native.model, request.model);
        assert_eq!(native.max_tokens, 128);
        assert_eq!(native.stream, Some(true));
        assert_eq!(native.messages[0].content.as_text(), "ping");
    }
}
