mod oauth;

pub use oauth::QwenAuthenticator;

use std::sync::Arc;

use async_trait::async_trait;

use aiproxy_protocol::Proto;
use aiproxy_protocol::qwen::QwenChatResponse;
use aiproxy_provider_core::{
    Authenticator, ByteStream, ModelInfo, Provider, ProviderError, ProviderResult, ProviderType,
};
use aiproxy_transform::{NativeRequest, NativeResponse};

use super::http_client::{SharedClientKind, client_for};
use super::upstream::{error_for_status, map_wreq_error, send_with_auth_retry, stream_body};

const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const SUPPORTED_MODELS: &[&str] = &["qwen3-coder-plus", "qwen3-coder-flash"];

pub struct QwenProvider {
    auth: Arc<QwenAuthenticator>,
}

impl QwenProvider {
    pub fn new(auth: Arc<QwenAuthenticator>) -> Self {
        Self { auth }
    }

    async fn chat_completions_url(&self) -> ProviderResult<String> {
        let base = self.auth.resource_url().await;
        Ok(format!(
            "{}/chat/completions",
            normalize_base_url(base.as_deref().unwrap_or(DEFAULT_BASE_URL))
        ))
    }

    fn apply_headers(&self, builder: wreq::RequestBuilder, token: &str) -> wreq::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .header("X-DashScope-AuthType", "qwen-oauth")
            .header(
                "X-DashScope-UserAgent",
                format!(
                    "QwenCode/0.0.10 ({}; {})",
                    std::env::consts::OS,
                    std::env::consts::ARCH
                ),
            )
            .header("X-DashScope-CacheControl", "enable")
    }
}

#[async_trait]
impl Provider for QwenProvider {
    fn name(&self) -> ProviderType {
        ProviderType::Qwen
    }

    fn protocol(&self) -> Proto {
        Proto::Qwen
    }

    fn supported_models(&self) -> Vec<String> {
        SUPPORTED_MODELS.iter().map(|m| m.to_string()).collect()
    }

    fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.auth.clone()
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
        Ok(SUPPORTED_MODELS.iter().map(ModelInfo::new).collect())
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &NativeRequest,
    ) -> ProviderResult<NativeResponse> {
        let NativeRequest::OpenAI(request) = request else {
            return Err(ProviderError::InvalidConfig(
                "qwen driver expects an openai-shaped request".to_string(),
            ));
        };
        let mut request = request.clone();
        request.model = model.to_string();
        request.stream = None;
        request.stream_options = None;

        let url = self.chat_completions_url().await?;
        let body = serde_json::to_vec(&request)
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        let client = client_for(SharedClientKind::NonStream)?;
        let resp = send_with_auth_retry(&(self.auth.clone() as Arc<dyn Authenticator>), |token| {
            self.apply_headers(client.post(&url), token)
                .body(body.clone())
        })
        .await?;

        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(map_wreq_error)?;
        if !(200..300).contains(&status) {
            return Err(error_for_status(status, &bytes));
        }
        let parsed: QwenChatResponse = serde_json::from_slice(&bytes)
            .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
        Ok(NativeResponse::Qwen(parsed))
    }

    async fn generate_content_stream(
        &self,
        model: &str,
        request: &NativeRequest,
    ) -> ProviderResult<ByteStream> {
        let NativeRequest::OpenAI(request) = request else {
            return Err(ProviderError::InvalidConfig(
                "qwen driver expects an openai-shaped request".to_string(),
            ));
        };
        let mut request = request.clone();
        request.model = model.to_string();
        request.stream = Some(true);
        request.stream_options = Some(aiproxy_protocol::openai::StreamOptions {
            include_usage: Some(true),
        });

        let url = self.chat_completions_url().await?;
        let body = serde_json::to_vec(&request)
            .map_err(|err| ProviderError::Other(err.to_string()))?;
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

/// The stored `resource_url` may omit the scheme and the `/v1` suffix.
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    if with_scheme.ends_with("/v1") {
        with_scheme
    } else {
        format!("{with_scheme}/v1")
    }
}
