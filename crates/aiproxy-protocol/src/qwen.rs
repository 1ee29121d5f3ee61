use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// DashScope-shaped chat response. Some deployments nest `choices`/`usage`
/// under `output`; both placements are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QwenChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<QwenChoice>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<QwenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<QwenOutput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QwenOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<QwenChoice>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<QwenUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QwenChoice {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<QwenMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QwenMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<JsonValue>>,
}

/// Usage counters arrive as JSON numbers that are sometimes floats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QwenUsage {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub prompt_tokens: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub completion_tokens: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub total_tokens: i64,
}

impl QwenChatResponse {
    /// Choices from either placement, top level preferred.
    pub fn take_choices(&mut self) -> Vec<QwenChoice> {
        if let Some(choices) = self.choices.take() {
            return choices;
        }
        self.output
            .as_mut()
            .and_then(|output| output.choices.take())
            .unwrap_or_default()
    }

    pub fn take_usage(&mut self) -> Option<QwenUsage> {
        if let Some(usage) = self.usage.take() {
            return Some(usage);
        }
        self.output.as_mut().and_then(|output| output.usage.take())
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom("numeric field out of range")),
        JsonValue::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!(
            "expected number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_choices_are_preferred() {
        let raw = serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello"},
                         "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        });
        let mut resp: QwenChatResponse = serde_json::from_value(raw).expect("parses");
        let choices = resp.take_choices();
        assert_eq!(choices.len(), 1);
        assert_eq!(
            choices[0].message.as_ref().unwrap().content.as_deref(),
            Some("Hello")
        );
        assert_eq!(resp.take_usage().unwrap().total_tokens, 6);
    }

    #[test]
    fn nested_output_shape_is_accepted() {
        let raw = serde_json::json!({
            "output": {
                "choices": [{"message": {"role": "assistant", "content": "ok"}}],
                "usage": {"prompt_tokens": 2.0, "completion_tokens": 1.0, "total_tokens": 3.0}
            }
        });
        let mut resp: QwenChatResponse = serde_json::from_value(raw).expect("parses");
        assert_eq!(resp.take_choices().len(), 1);
        assert_eq!(resp.take_usage().unwrap().total_tokens, 3);
    }
}
