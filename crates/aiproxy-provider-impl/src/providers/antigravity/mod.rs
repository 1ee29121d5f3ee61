mod oauth;

pub use oauth::AntigravityAuthenticator;

use std::sync::Arc;

use async_trait::async_trait;
use rand::RngCore;
use serde_json::Value as JsonValue;

use aiproxy_protocol::Proto;
use aiproxy_protocol::gemini::GenerateContentRequest;
use aiproxy_provider_core::{
    Authenticator, ByteStream, ModelInfo, Provider, ProviderError, ProviderResult, ProviderType,
};
use aiproxy_transform::{NativeRequest, NativeResponse};

use super::http_client::{SharedClientKind, client_for};
use super::upstream::{error_for_status, map_wreq_error, send_with_auth_retry, stream_body};

const DAILY_BASE_URL: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";
const AUTOPUSH_BASE_URL: &str = "https://autopush-cloudcode-pa.sandbox.googleapis.com";
const ANTIGRAVITY_USER_AGENT: &str = "antigravity/1.15.8 (Windows; AMD64)";

/// Public model id → upstream alias.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("gemini-3-pro", "gemini-3-pro-preview-11-2025"),
    ("gemini-3-flash", "gemini-3-flash-preview-11-2025"),
    ("claude-sonnet-4-5", "claude-sonnet-4-5-20250929"),
    ("claude-opus-4-5", "claude-opus-4-5-20251101"),
];

pub struct AntigravityProvider {
    auth: Arc<AntigravityAuthenticator>,
    base_url: String,
}

impl AntigravityProvider {
    pub fn new(auth: Arc<AntigravityAuthenticator>) -> Self {
        Self {
            auth,
            base_url: DAILY_BASE_URL.to_string(),
        }
    }

    /// Point the driver at the autopush sandbox instead of daily.
    pub fn with_autopush(auth: Arc<AntigravityAuthenticator>) -> Self {
        Self {
            auth,
            base_url: AUTOPUSH_BASE_URL.to_string(),
        }
    }

    fn apply_headers(&self, builder: wreq::RequestBuilder, token: &str) -> wreq::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("User-Agent", ANTIGRAVITY_USER_AGENT)
            .header("Accept-Encoding", "gzip")
    }

    async fn wrapped_body(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> ProviderResult<Vec<u8>> {
        let project = self.auth.ensure_project_id().await?;
        let alias = resolve_alias(model);
        let shaped = shape_request(&alias, request);
        let wrapped = serde_json::json!({
            "model": alias,
            "userAgent": "antigravity",
            "project": project,
            "requestId": generate_request_id(),
            "sessionId": generate_session_id(),
            "request": shaped,
        });
        serde_json::to_vec(&wrapped).map_err(|err| ProviderError::Other(err.to_string()))
    }
}

#[async_trait]
impl Provider for AntigravityProvider {
    fn name(&self) -> ProviderType {
        ProviderType::Antigravity
    }

    fn protocol(&self) -> Proto {
        Proto::Gemini
    }

    fn supported_models(&self) -> Vec<String> {
        MODEL_ALIASES.iter().map(|(id, _)| id.to_string()).collect()
    }

    fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.auth.clone()
    }

    async fn initialize(&self) -> ProviderResult<()> {
        self.auth.ensure_project_id().await.map(|_| ())
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
        Ok(MODEL_ALIASES
            .iter()
            .map(|(id, _)| ModelInfo::new(*id))
            .collect())
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &NativeRequest,
    ) -> ProviderResult<NativeResponse> {
        let NativeRequest::Gemini(request) = request else {
            return Err(ProviderError::InvalidConfig(
                "antigravity driver expects a gemini-shaped request".to_string(),
            ));
        };
        let body = self.wrapped_body(model, request).await?;
        let url = format!("{}/v1internal:generateContent", self.base_url);
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
        let payload: JsonValue = serde_json::from_slice(&bytes)
            .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
        let native = payload.get("response").cloned().unwrap_or(payload);
        Ok(NativeResponse::Gemini(native))
    }

    async fn generate_content_stream(
        &self,
        model: &str,
        request: &NativeRequest,
    ) -> ProviderResult<ByteStream> {
        let NativeRequest::Gemini(request) = request else {
            return Err(ProviderError::InvalidConfig(
                "antigravity driver expects a gemini-shaped request".to_string(),
            ));
        };
        let body = self.wrapped_body(model, request).await?;
        let url = format!("{}/v1internal:streamGenerateContent?alt=sse", self.base_url);
        let client = client_for(SharedClientKind::Stream)?;
        let resp = send_with_auth_retry(&(self.auth.clone() as Arc<dyn Authenticator>), |token| {
            self.apply_headers(client.post(&url), token)
                .header("Accept", "text/event-stream")
                .body(body.clone())
        })
        .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let bytes = resp.bytes().await.map_err(map_wreq_error)?;
            return Err(error_for_status(status, &bytes));
        }
        Ok(stream_body(resp))
    }
}

pub(crate) fn resolve_alias(model: &str) -> String {
    MODEL_ALIASES
        .iter()
        .find(|(id, _)| *id == model)
        .map(|(_, alias)| alias.to_string())
        .unwrap_or_else(|| model.to_string())
}

/// Sandbox request shaping: no safety settings, no output-token cap, tool
/// calling pinned to VALIDATED, thinking knobs rewritten per model family.
pub(crate) fn shape_request(alias: &str, request: &GenerateContentRequest) -> GenerateContentRequest {
    let mut shaped = request.clone();
    shaped.safety_settings = None;

    if let Some(JsonValue::Object(config)) = shaped.generation_config.as_mut() {
        config.remove("maxOutputTokens");
        if !alias.starts_with("gemini-3")
            && let Some(thinking) = config.get_mut("thinkingConfig")
            && let Some(thinking) = thinking.as_object_mut()
        {
            thinking.remove("thinkingLevel");
            thinking.insert("thinkingBudget".to_string(), serde_json::json!(-1));
        }
    }

    let mut tool_config = shaped
        .tool_config
        .take()
        .and_then(|value| value.as_object().cloned())
        .unwrap_or_default();
    let mut calling = tool_config
        .get("functionCallingConfig")
        .and_then(|value| value.as_object().cloned())
        .unwrap_or_default();
    calling.insert("mode".to_string(), serde_json::json!("VALIDATED"));
    tool_config.insert(
        "functionCallingConfig".to_string(),
        JsonValue::Object(calling),
    );
    shaped.tool_config = Some(JsonValue::Object(tool_config));

    if alias.starts_with("claude-") {
        if let Some(tools) = shaped.tools.as_mut() {
            rewrite_claude_tool_schemas(tools);
        }
    }

    shaped
}

/// Claude-family models take `parameters` (without `$schema`) instead of
/// `parametersJsonSchema`.
fn rewrite_claude_tool_schemas(tools: &mut JsonValue) {
    let Some(tools) = tools.as_array_mut() else {
        return;
    };
    for tool in tools {
        let Some(declarations) = tool
            .get_mut("functionDeclarations")
            .and_then(|v| v.as_array_mut())
        else {
            continue;
        };
        for declaration in declarations {
            let Some(declaration) = declaration.as_object_mut() else {
                continue;
            };
            if let Some(mut schema) = declaration.remove("parametersJsonSchema") {
                if let Some(schema) = schema.as_object_mut() {
                    schema.remove("$schema");
                }
                declaration.insert("parameters".to_string(), schema);
            }
        }
    }
}

fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    let mut rng = rand::rng();
    rng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from(value: serde_json::Value) -> GenerateContentRequest {
        serde_json::from_value(value).expect("request parses")
    }

    #[test]
    fn aliases_map_known_models_and_pass_unknown_through() {
        assert_eq!(resolve_alias("gemini-3-pro"), "gemini-3-pro-preview-11-2025");
        assert_eq!(resolve_alias("unlisted"), "unlisted");
    }

    #[test]
    fn shaping_strips_safety_and_output_cap_and_pins_tool_mode() {
        let request = request_from(serde_json::json!({
            "contents": [],
            "safetySettings": [{"category": "X", "threshold": "BLOCK_NONE"}],
            "generationConfig": {"maxOutputTokens": 1024, "temperature": 0.1}
        }));
        let shaped = shape_request("gemini-3-pro-preview-11-2025", &request);
        assert!(shaped.safety_settings.is_none());
        let config = shaped.generation_config.expect("config kept");
        assert!(config.get("maxOutputTokens").is_none());
        assert_eq!(config["temperature"], 0.1);
        assert_eq!(
            shaped.tool_config.expect("tool config")["functionCallingConfig"]["mode"],
            "VALIDATED"
        );
    }

    #[test]
    fn non_gemini3_models_get_a_thinking_budget() {
        let request = request_from(serde_json::json!({
            "contents": [],
            "generationConfig": {"thinkingConfig": {"thinkingLevel": "HIGH"}}
        }));
        let shaped = shape_request("claude-sonnet-4-5-20250929", &request);
        let config = shaped.generation_config.expect("config");
        let thinking = &config["thinkingConfig"];
        assert!(thinking.get("thinkingLevel").is_none());
        assert_eq!(thinking["thinkingBudget"], -1);

        let request = request_from(serde_json::json!({
            "contents": [],
            "generationConfig": {"thinkingConfig": {"thinkingLevel": "HIGH"}}
        }));
        let shaped = shape_request("gemini-3-pro-preview-11-2025", &request);
        let config = shaped.generation_config.expect("config");
        assert_eq!(config["thinkingConfig"]["thinkingLevel"], "HIGH");
    }

    #[test]
    fn claude_tools_lose_the_json_schema_wrapper() {
        let request = request_from(serde_json::json!({
            "contents": [],
            "tools": [{"functionDeclarations": [{
                "name": "lookup",
                "parametersJsonSchema": {"$schema": "http://json-schema.org/draft-07/schema#",
                                          "type": "object"}
            }]}]
        }));
        let shaped = shape_request("claude-sonnet-4-5-20250929", &request);
        let declaration = &shaped.tools.expect("tools")[0]["functionDeclarations"][0];
        assert!(declaration.get("parametersJsonSchema").is_none());
        assert_eq!(declaration["parameters"]["type"], "object");
        assert!(declaration["parameters"].get("$schema").is_none());
    }
}
