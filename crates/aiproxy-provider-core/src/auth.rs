use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::ProviderResult;
use crate::provider::ProviderType;

/// OAuth token endpoint response shared by the provider flows.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Credential lifecycle for one provider.
///
/// `get_token` loads credentials lazily, refreshes transparently inside the
/// five-minute expiry skew, and persists after any change. Callers that see
/// an upstream 401 despite a fresh-looking token must call `force_refresh`
/// and retry exactly once.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn provider(&self) -> ProviderType;

    fn credentials_path(&self) -> PathBuf;

    /// Interactive first-time flow (PKCE browser round-trip, device code, …).
    async fn authenticate(&self) -> ProviderResult<()>;

    async fn get_token(&self) -> ProviderResult<String>;

    async fn force_refresh(&self) -> ProviderResult<String>;

    fn is_authenticated(&self) -> bool;

    fn clear(&self) -> ProviderResult<()>;
}
