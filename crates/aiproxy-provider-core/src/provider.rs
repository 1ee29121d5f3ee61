use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use aiproxy_protocol::Proto;
use aiproxy_transform::{NativeRequest, NativeResponse};

use crate::auth::Authenticator;
use crate::errors::ProviderResult;

/// Upstream body chunks bridged off the HTTP client by the IO layer. A
/// mid-stream failure (read-idle timeout, transport error) arrives as an
/// `Err` item so consumers can tell it apart from clean EOF.
pub type ByteStream = tokio::sync::mpsc::Receiver<ProviderResult<bytes::Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Qwen,
    GeminiCli,
    Kiro,
    Antigravity,
    Iflow,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Qwen => "qwen",
            ProviderType::GeminiCli => "gemini-cli",
            ProviderType::Kiro => "kiro",
            ProviderType::Antigravity => "antigravity",
            ProviderType::Iflow => "iflow",
        }
    }

    /// Name reported as `owned_by` on the OpenAI models surface. The
    /// `gemini-cli` provider is reported as plain `gemini`.
    pub fn owner_name(&self) -> &'static str {
        match self {
            ProviderType::GeminiCli => "gemini",
            other => other.as_str(),
        }
    }

    /// Route prefix (`/{prefix}/v1/...`) for the pinned handlers.
    pub fn route_prefix(&self) -> &'static str {
        match self {
            ProviderType::GeminiCli => "gemini",
            other => other.as_str(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "qwen" => Some(ProviderType::Qwen),
            "gemini-cli" | "gemini" => Some(ProviderType::GeminiCli),
            "kiro" => Some(ProviderType::Kiro),
            "antigravity" => Some(ProviderType::Antigravity),
            "iflow" => Some(ProviderType::Iflow),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }
}

/// One upstream provider. Implementations translate native requests to the
/// provider's wire format, issue HTTP with a token from their authenticator,
/// and yield parsed responses or raw streaming bodies.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> ProviderType;

    fn protocol(&self) -> Proto;

    fn supported_models(&self) -> Vec<String>;

    fn authenticator(&self) -> Arc<dyn Authenticator>;

    /// One-time setup before the first generate call (e.g. the Cloud Code
    /// Assist project handshake). Default is a no-op.
    async fn initialize(&self) -> ProviderResult<()> {
        Ok(())
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>>;

    async fn generate_content(
        &self,
        model: &str,
        request: &NativeRequest,
    ) -> ProviderResult<NativeResponse>;

    async fn generate_content_stream(
        &self,
        model: &str,
        request: &NativeRequest,
    ) -> ProviderResult<ByteStream>;

    async fn is_healthy(&self) -> bool {
        self.authenticator().is_authenticated()
    }
}
