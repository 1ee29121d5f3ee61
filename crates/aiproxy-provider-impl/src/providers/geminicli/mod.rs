mod oauth;

pub use oauth::GeminiCliAuthenticator;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::info;

use aiproxy_protocol::Proto;
use aiproxy_protocol::gemini::GenerateContentRequest;
use aiproxy_provider_core::{
    Authenticator, ByteStream, ModelInfo, Provider, ProviderError, ProviderResult, ProviderType,
};
use aiproxy_transform::{NativeRequest, NativeResponse};

use super::http_client::{SharedClientKind, client_for};
use super::upstream::{error_for_status, map_wreq_error, send_with_auth_retry, stream_body};

const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";
const GEMINICLI_USER_AGENT: &str = "GeminiCLI/0.1.5 (Windows; AMD64)";
const SUPPORTED_MODELS: &[&str] = &["gemini-2.5-pro", "gemini-2.5-flash"];
const ONBOARD_POLL_ATTEMPTS: usize = 30;
const ONBOARD_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct GeminiCliProvider {
    auth: Arc<GeminiCliAuthenticator>,
}

impl GeminiCliProvider {
    pub fn new(auth: Arc<GeminiCliAuthenticator>) -> Self {
        Self { auth }
    }

    fn wrap_request(&self, model: &str, project: &str, request: &GenerateContentRequest) -> JsonValue {
        serde_json::json!({
            "model": model,
            "project": project,
            "request": request,
        })
    }

    fn apply_headers(&self, builder: wreq::RequestBuilder, token: &str) -> wreq::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("User-Agent", GEMINICLI_USER_AGENT)
            .header("Accept-Encoding", "gzip")
    }

    async fn project_id(&self) -> ProviderResult<String> {
        self.auth.ensure_project_id().await
    }
}

#[async_trait]
impl Provider for GeminiCliProvider {
    fn name(&self) -> ProviderType {
        ProviderType::GeminiCli
    }

    fn protocol(&self) -> Proto {
        Proto::Gemini
    }

    fn supported_models(&self) -> Vec<String> {
        SUPPORTED_MODELS.iter().map(|m| m.to_string()).collect()
    }

    fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.auth.clone()
    }

    /// Project-discovery handshake; must run before the first generate call.
    async fn initialize(&self) -> ProviderResult<()> {
        let project = self.project_id().await?;
        info!(project = %project, "cloud code assist project ready");
        Ok(())
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
        Ok(SUPPORTED_MODELS.iter().map(ModelInfo::new).collect())
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &NativeRequest,
    ) -> ProviderResult<NativeResponse> {
        let NativeRequest::Gemini(request) = request else {
            return Err(ProviderError::InvalidConfig(
                "gemini driver expects a gemini-shaped request".to_string(),
            ));
        };
        let project = self.project_id().await?;
        let model = aiproxy_protocol::gemini::normalize_model_name(model).to_string();
        let wrapped = self.wrap_request(&model, &project, request);
        let body =
            serde_json::to_vec(&wrapped).map_err(|err| ProviderError::Other(err.to_string()))?;
        let url = format!("{DEFAULT_BASE_URL}/v1internal:generateContent");
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
        // The internal surface nests the Gemini response under `response`.
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
                "gemini driver expects a gemini-shaped request".to_string(),
            ));
        };
        let project = self.project_id().await?;
        let model = aiproxy_protocol::gemini::normalize_model_name(model).to_string();
        let wrapped = self.wrap_request(&model, &project, request);
        let body =
            serde_json::to_vec(&wrapped).map_err(|err| ProviderError::Other(err.to_string()))?;
        let url = format!("{DEFAULT_BASE_URL}/v1internal:streamGenerateContent?alt=sse");
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

pub(crate) fn assist_metadata() -> JsonValue {
    serde_json::json!({
        "ideType": "IDE_UNSPECIFIED",
        "platform": "PLATFORM_UNSPECIFIED",
        "pluginType": "GEMINI",
        "duetProject": "",
    })
}

/// `v1internal:loadCodeAssist`: returns the companion project when the
/// account already has one.
pub(crate) async fn load_code_assist(
    base_url: &str,
    user_agent: &str,
    access_token: &str,
) -> ProviderResult<JsonValue> {
    let client = client_for(SharedClientKind::NonStream)?;
    let url = format!("{}/v1internal:loadCodeAssist", base_url.trim_end_matches('/'));
    let body = serde_json::json!({
        "cloudaicompanionProject": "",
        "metadata": assist_metadata(),
    });
    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {access_token}"))
        .header("User-Agent", user_agent)
        .header("Content-Type", "application/json")
        .header("Accept-Encoding", "gzip")
        .body(serde_json::to_vec(&body).map_err(|err| ProviderError::Other(err.to_string()))?)
        .send()
        .await
        .map_err(map_wreq_error)?;
    let status = resp.status().as_u16();
    let bytes = resp.bytes().await.map_err(map_wreq_error)?;
    if !(200..300).contains(&status) {
        return Err(error_for_status(status, &bytes));
    }
    serde_json::from_slice(&bytes).map_err(|err| ProviderError::MalformedResponse(err.to_string()))
}

fn default_tier(payload: &JsonValue) -> String {
    payload
        .get("allowedTiers")
        .and_then(|tiers| tiers.as_array())
        .and_then(|tiers| {
            tiers.iter().find(|tier| {
                tier.get("isDefault").and_then(|v| v.as_bool()) == Some(true)
            })
        })
        .and_then(|tier| tier.get("id"))
        .and_then(|id| id.as_str())
        .unwrap_or("LEGACY")
        .to_string()
}

/// Onboard the account and poll the long-running operation until `done`.
pub(crate) async fn onboard_user(
    base_url: &str,
    user_agent: &str,
    access_token: &str,
    tier_id: &str,
) -> ProviderResult<Option<String>> {
    let client = client_for(SharedClientKind::NonStream)?;
    let url = format!("{}/v1internal:onboardUser", base_url.trim_end_matches('/'));
    let body = serde_json::json!({
        "tierId": tier_id,
        "cloudaicompanionProject": "",
        "metadata": assist_metadata(),
    });
    let body = serde_json::to_vec(&body).map_err(|err| ProviderError::Other(err.to_string()))?;
    for _ in 0..ONBOARD_POLL_ATTEMPTS {
        let resp = client
            .post(&url)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("User-Agent", user_agent)
            .header("Content-Type", "application/json")
            .header("Accept-Encoding", "gzip")
            .body(body.clone())
            .send()
            .await
            .map_err(map_wreq_error)?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(map_wreq_error)?;
        if !(200..300).contains(&status) {
            return Err(error_for_status(status, &bytes));
        }
        let payload: JsonValue = serde_json::from_slice(&bytes)
            .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
        if payload.get("done").and_then(|v| v.as_bool()) == Some(true) {
            let project = payload
                .get("response")
                .and_then(|v| v.get("cloudaicompanionProject"));
            let project_id = project
                .and_then(|v| v.get("id"))
                .and_then(|v| v.as_str())
                .map(|v| v.to_string())
                .or_else(|| project.and_then(|v| v.as_str()).map(|v| v.to_string()));
            return Ok(project_id);
        }
        tokio::time::sleep(ONBOARD_POLL_INTERVAL).await;
    }
    Ok(None)
}

/// loadCodeAssist first; fall back to onboarding with the default tier.
pub(crate) async fn discover_project_id(
    base_url: &str,
    user_agent: &str,
    access_token: &str,
) -> ProviderResult<Option<String>> {
    let payload = load_code_assist(base_url, user_agent, access_token).await?;
    if let Some(project) = payload
        .get("cloudaicompanionProject")
        .and_then(|v| v.as_str())
        && !project.trim().is_empty()
    {
        return Ok(Some(project.to_string()));
    }
    let tier = default_tier(&payload);
    onboard_user(base_url, user_agent, access_token, &tier).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tier_picks_the_flagged_entry() {
        let payload = serde_json::json!({
            "allowedTiers": [
                {"id": "STANDARD", "isDefault": false},
                {"id": "FREE", "isDefault": true},
            ]
        });
        assert_eq!(default_tier(&payload), "FREE");
        assert_eq!(default_tier(&serde_json::json!({})), "LEGACY");
    }
}
