use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use aiproxy_provider_core::{
    Authenticator, CredentialRecord, CredentialStore, PkcePair, ProviderError, ProviderResult,
    ProviderType, pkce,
};

use crate::providers::http_client::{SharedClientKind, client_for};
use crate::providers::oauth_common::{build_authorize_url, post_token_form, wait_for_callback};
use crate::providers::upstream::map_wreq_error;

const AUTH_URL: &str = "https://iflow.cn/oauth/authorize";
const TOKEN_URL: &str = "https://iflow.cn/oauth/token";
const USERINFO_URL: &str = "https://iflow.cn/api/oauth/getUserInfo";
const CLIENT_ID: &str = "10009311001";
const CLIENT_SECRET: &str = "4Z3YjXycVsQvyGF2etnNre3DG3jhqP2y";
const OAUTH_SCOPE: &str = "openid profile api";
const REDIRECT_PORT: u16 = 11451;

#[derive(Debug, Deserialize)]
struct UserInfoEnvelope {
    #[serde(default)]
    data: Option<UserInfoData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfoData {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    id: Option<serde_json::Value>,
}

/// iFlow prefers the derived sk-key from the user-info endpoint over the raw
/// OAuth token for LLM calls; the raw token only drives refresh and identity.
pub struct IflowAuthenticator {
    store: CredentialStore,
    record: Mutex<Option<CredentialRecord>>,
}

impl IflowAuthenticator {
    pub fn new() -> ProviderResult<Self> {
        Ok(Self {
            store: CredentialStore::for_provider(ProviderType::Iflow)?,
            record: Mutex::new(None),
        })
    }

    pub fn with_store(store: CredentialStore) -> Self {
        Self {
            store,
            record: Mutex::new(None),
        }
    }

    async fn refresh_locked(&self, record: &mut CredentialRecord) -> ProviderResult<String> {
        let refresh_token = record
            .refresh_token
            .clone()
            .ok_or_else(|| ProviderError::RefreshFailed("no refresh token stored".to_string()))?;
        let tokens = post_token_form(
            TOKEN_URL,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
            ],
            Some((CLIENT_ID, CLIENT_SECRET)),
        )
        .await?;
        record.apply_refresh(
            tokens.access_token,
            tokens.refresh_token,
            tokens.expires_in,
            tokens.token_type,
            tokens.scope,
        );
        // Refetch the derived sk-key; a 401 that forced this refresh may
        // mean the old key was revoked.
        match fetch_user_info(&record.access_token).await {
            Ok(user) => apply_user_info(record, user),
            Err(err) => warn!(error = %err, "iflow user-info fetch failed"),
        }
        self.store.save(record)?;
        Ok(bearer_of(record))
    }
}

#[async_trait]
impl Authenticator for IflowAuthenticator {
    fn provider(&self) -> ProviderType {
        ProviderType::Iflow
    }

    fn credentials_path(&self) -> PathBuf {
        self.store.path().to_path_buf()
    }

    async fn authenticate(&self) -> ProviderResult<()> {
        let pair = PkcePair::generate();
        let state = pkce::random_state();
        let redirect_uri = format!("http://localhost:{REDIRECT_PORT}/oauth-callback");
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
        println!("Open this URL to authorize iFlow access:\n{auth_url}");

        let callback = wait_for_callback(REDIRECT_PORT, Some(&state)).await?;
        let tokens = post_token_form(
            TOKEN_URL,
            &[
                ("grant_type", "authorization_code"),
                ("code", &callback.code),
                ("redirect_uri", &redirect_uri),
                ("code_verifier", &pair.verifier),
            ],
            Some((CLIENT_ID, CLIENT_SECRET)),
        )
        .await?;

        let mut record = CredentialRecord::default();
        record.apply_refresh(
            tokens.access_token,
            tokens.refresh_token,
            tokens.expires_in,
            tokens.token_type,
            tokens.scope,
        );
        let user = fetch_user_info(&record.access_token).await?;
        apply_user_info(&mut record, user);
        self.store.save(&record)?;
        info!(path = %self.store.path().display(), "iflow credentials saved");
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
            .ok_or(ProviderError::NoCredentials("iflow"))?;
        if record.is_valid() {
            return Ok(bearer_of(record));
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
            .ok_or(ProviderError::NoCredentials("iflow"))?;
        self.refresh_locked(record).await
    }

    fn is_authenticated(&self) -> bool {
        self.store.exists()
    }

    fn clear(&self) -> ProviderResult<()> {
        self.store.clear()
    }
}

fn bearer_of(record: &CredentialRecord) -> String {
    record
        .api_key
        .clone()
        .unwrap_or_else(|| record.access_token.clone())
}

fn apply_user_info(record: &mut CredentialRecord, user: UserInfoData) {
    if user.api_key.is_some() {
        record.api_key = user.api_key;
    }
    if user.email.is_some() {
        record.email = user.email;
    }
    if let Some(id) = user.id {
        record.user_id = Some(match id {
            serde_json::Value::String(id) => id,
            other => other.to_string(),
        });
    }
}

async fn fetch_user_info(access_token: &str) -> ProviderResult<UserInfoData> {
    let client = client_for(SharedClientKind::NonStream)?;
    let resp = client
        .get(USERINFO_URL)
        .header("Authorization", format!("Bearer {access_token}"))
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(map_wreq_error)?;
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(map_wreq_error)?;
    if !status.is_success() {
        let text = String::from_utf8_lossy(&bytes);
        return Err(ProviderError::Upstream {
            status: status.as_u16(),
            message: text.into_owned(),
        });
    }
    let envelope: UserInfoEnvelope = serde_json::from_slice(&bytes)
        .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
    envelope
        .data
        .ok_or_else(|| ProviderError::MalformedResponse("user-info payload missing data".to_string()))
}
