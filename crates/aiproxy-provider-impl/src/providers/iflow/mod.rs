mod oauth;

pub use oauth::IflowAuthenticator;

use std::sync::Arc;

use async_trait::async_trait;

use aiproxy_protocol::Proto;
use aiproxy_protocol::openai::ChatCompletionResponse;
use aiproxy_provider_core::{
    Authenticator, ByteStream, ModelInfo, Provider, ProviderError, ProviderResult, ProviderType,
};
use aiproxy_transform::{NativeRequest, NativeResponse};

use super::http_client::{SharedClientKind, client_for};
use super::upstream::{error_for_status, map_wreq_error, send_with_auth_retry, stream_body};

const CHAT_COMPLETIONS_URL: &str = "https://apis.iflow.cn/v1/chat/completions";
const SUPPORTED_MODELS: &[&str] = &["qwen3-coder", "kimi-k2", "deepseek-v3.1", "glm-4.5"];

pub struct IflowProvider {
    auth: Arc<IflowAuthenticator>,
}

impl IflowProvider {
    pub fn new(auth: Arc<IflowAuthenticator>) -> Self {
        Self { auth }
    }

    fn apply_headers(&self, builder: wreq::RequestBuilder, token: &str) -> wreq::RequestBuilder {
        // `token` is the derived sk-key, not the raw OAuth access token.
        builder
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
    }
}

#[async_trait]
impl Provider for IflowProvider {
    fn name(&self) -> ProviderType {
        ProviderType::Iflow
    }

    fn protocol(&self) -> Proto {
        Proto::OpenAI
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
                "iflow driver expects an openai-shaped request".to_string(),
            ));
        };
        let mut request = request.clone();
        request.model = model.to_string();
        request.stream = None;
        request.stream_options = None;

        let body = serde_json::to_vec(&request)
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        let client = client_for(SharedClientKind::NonStream)?;
        let resp = send_with_auth_retry(&(self.auth.clone() as Arc<dyn Authenticator>), |token| {
            self.apply_headers(client.post(CHAT_COMPLETIONS_URL), token)
                .body(body.clone())
        })
        .await?;

        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(map_wreq_error)?;
        if !(200..300).contains(&status) {
            return Err(error_for_status(status, &bytes));
        }
        let parsed: ChatCompletionResponse = serde_json::from_slice(&bytes)
            .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
        Ok(NativeResponse::OpenAI(parsed))
    }

    async fn generate_content_stream(
        &self,
        model: &str,
        request: &NativeRequest,
    ) -> ProviderResult<ByteStream> {
        let NativeRequest::OpenAI(request) = request else {
            return Err(ProviderError::InvalidConfig(
                "iflow driver expects an openai-shaped request".to_string(),
            ));
        };
        let mut request = request.clone();
        request.model = model.to_string();
        request.stream = Some(true);

        let body = serde_json::to_vec(&request)
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        let client = client_for(SharedClientKind::Stream)?;
        let resp = send_with_auth_retry(&(self.auth.clone() as Arc<dyn Authenticator>), |token| {
            self.apply_headers(client.post(CHAT_COMPLETIONS_URL), token)
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
