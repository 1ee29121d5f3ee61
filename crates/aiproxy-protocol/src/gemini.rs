use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Gemini generateContent request body. The native handlers pass bodies
/// through untouched, so only the keys the drivers reshape are typed; the
/// rest ride in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_settings: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiModel {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_token_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_token_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_generation_methods: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiModelList {
    pub models: Vec<GeminiModel>,
}

/// `models/gemini-…` → `gemini-…`.
pub fn normalize_model_name(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let raw = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "cachedContent": "projects/x/cachedContents/y"
        });
        let req: GenerateContentRequest = serde_json::from_value(raw.clone()).expect("parses");
        assert!(req.extra.contains_key("cachedContent"));
        let back = serde_json::to_value(&req).expect("serializes");
        assert_eq!(back, raw);
    }

    #[test]
    fn model_names_are_normalized() {
        assert_eq!(normalize_model_name("models/gemini-2.5-pro"), "gemini-2.5-pro");
        assert_eq!(normalize_model_name("gemini-2.5-pro"), "gemini-2.5-pro");
    }
}
