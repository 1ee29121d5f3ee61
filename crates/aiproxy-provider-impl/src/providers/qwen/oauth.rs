use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use aiproxy_provider_core::{
    Authenticator, CredentialRecord, CredentialStore, PkcePair, ProviderError, ProviderResult,
    ProviderType, pkce,
};

use crate::providers::http_client::{SharedClientKind, client_for};
use crate::providers::oauth_common::{build_authorize_url, encode_form, wait_for_callback};
use crate::providers::upstream::map_wreq_error;

const AUTH_URL: &str = "https://chat.qwen.ai/oauth2/authorize";
const TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
const CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";
const OAUTH_SCOPE: &str = "openid profile email model.completion";
const REDIRECT_PORT: u16 = 8085;

/// Qwen token responses additionally carry the DashScope endpoint base for
/// this account.
#[derive(Debug, Deserialize)]
struct QwenTokenPayload {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    resource_url: Option<String>,
}

pub struct QwenAuthenticator {
    store: CredentialStore,
    record: Mutex<Option<CredentialRecord>>,
}

impl QwenAuthenticator {
    pub fn new() -> ProviderResult<Self> {
        Ok(Self {
            store: CredentialStore::for_provider(ProviderType::Qwen)?,
            record: Mutex::new(None),
        })
    }

    pub fn with_store(store: CredentialStore) -> Self {
        Self {
            store,
            record: Mutex::new(None),
        }
    }

    pub(crate) async fn resource_url(&self) -> Option<String> {
        let mut guard = self.record.lock().await;
        if guard.is_none() {
            *guard = self.store.load().ok().flatten();
        }
        guard.as_ref().and_then(|record| record.resource_url.clone())
    }

    async fn refresh_locked(
        &self,
        record: &mut CredentialRecord,
    ) -> ProviderResult<String> {
        let refresh_token = record
            .refresh_token
            .clone()
            .ok_or_else(|| ProviderError::RefreshFailed("no refresh token stored".to_string()))?;
        let payload = post_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh_token),
            ("client_id", CLIENT_ID),
        ])
        .await?;
        record.apply_refresh(
            payload.access_token,
            payload.refresh_token,
            payload.expires_in,
            payload.token_type,
            payload.scope,
        );
        if payload.resource_url.is_some() {
            record.resource_url = payload.resource_url;
        }
        self.store.save(record)?;
        Ok(record.access_token.clone())
    }
}

#[async_trait]
impl Authenticator for QwenAuthenticator {
    fn provider(&self) -> ProviderType {
        ProviderType::Qwen
    }

    fn credentials_path(&self) -> PathBuf {
        self.store.path().to_path_buf()
    }

    async fn authenticate(&self) -> ProviderResult<()> {
        let pair = PkcePair::generate();
        let state = pkce::random_state();
        let redirect_uri = format!("http://localhost:{REDIRECT_PORT}/callback");
        let auth_url = build_authorize_url(
            AUTH_URL,
            &[
                ("response_type", "code"),
                ("client_id", CLIENT_ID),
                ("redirect_uri", &redirect_uri),
                ("scope", OAUTH_SCOPE),
                ("code_challenge_method", "S256"),
                ("code_challenge", &pair.challenge),
                ("state", &state),
            ],
        );
        println!("Open this URL to authorize Qwen access:\n{auth_url}");

        let callback = wait_for_callback(REDIRECT_PORT, Some(&state)).await?;
        let payload = post_token(&[
            ("grant_type", "authorization_code"),
            ("code", &callback.code),
            ("client_id", CLIENT_ID),
            ("redirect_uri", &redirect_uri),
            ("code_verifier", &pair.verifier),
        ])
        .await?;

        let mut record = CredentialRecord::default();
        record.apply_refresh(
            payload.access_token,
            payload.refresh_token,
            payload.expires_in,
            payload.token_type,
            payload.scope,
        );
        record.resource_url = payload.resource_url;
        self.store.save(&record)?;
        info!(path = %self.store.path().display(), "qwen credentials saved");
        *self.record.lock().await = Some(record);
        Ok(())
    }

    async fn get_token(&self) -> ProviderResult<String> {
        let mut guard = self.record.lock().await;
        if guard.is_none() {
            *guard = self.store.load()?;
        }
        let record = guard
            .as_mut()
            .ok_or(ProviderError::NoCredentials("qwen"))?;
        if record.is_valid() {
            return Ok(record.access_token.clone());
        }
        self.refresh_locked(record).await
    }

    async fn force_refresh(&self) -> ProviderResult<String> {
        let mut guard = self.record.lock().await;
        if guard.is_none() {
            *guard = self.store.load()?;
        }
        let record = guard
            .as_mut()
            .ok_or(ProviderError::NoCredentials("qwen"))?;
        self.refresh_locked(record).await
    }

    fn is_authenticated(&self) -> bool {
        self.store.exists()
    }

    fn clear(&self) -> ProviderResult<()> {
        self.store.clear()
    }
}

async fn post_token(pairs: &[(&str, &str)]) -> ProviderResult<QwenTokenPayload> {
    let client = client_for(SharedClientKind::NonStream)?;
    let resp = client
        .post(TOKEN_URL)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Accept", "application/json")
        .body(encode_form(pairs))
        .send()
        .await
        .map_err(map_wreq_error)?;
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(map_wreq_error)?;
    if !status.is_success() {
        let text = String::from_utf8_lossy(&bytes);
        return Err(ProviderError::RefreshFailed(format!(
            "{} {}",
            status.as_u16(),
            text
        )));
    }
    serde_json::from_slice(&bytes).map_err(|err| ProviderError::MalformedResponse(err.to_string()))
}
