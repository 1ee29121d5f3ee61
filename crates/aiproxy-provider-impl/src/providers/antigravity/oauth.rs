use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use aiproxy_provider_core::{
    Authenticator, CredentialRecord, CredentialStore, PkcePair, ProviderError, ProviderResult,
    ProviderType, pkce,
};

use crate::providers::geminicli::discover_project_id;
use crate::providers::oauth_common::{build_authorize_url, post_token_form, wait_for_callback};

use super::{ANTIGRAVITY_USER_AGENT, DAILY_BASE_URL};

// Antigravity rides the same Google OAuth client as the Gemini CLI.
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CLIENT_ID: &str = "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const CLIENT_SECRET: &str = "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";
const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/userinfo.email https://www.googleapis.com/auth/userinfo.profile";
const REDIRECT_PORT: u16 = 51121;

pub struct AntigravityAuthenticator {
    store: CredentialStore,
    record: Mutex<Option<CredentialRecord>>,
}

impl AntigravityAuthenticator {
    pub fn new() -> ProviderResult<Self> {
        Ok(Self {
            store: CredentialStore::for_provider(ProviderType::Antigravity)?,
            record: Mutex::new(None),
        })
    }

    pub fn with_store(store: CredentialStore) -> Self {
        Self {
            store,
            record: Mutex::new(None),
        }
    }

    pub(crate) async fn ensure_project_id(&self) -> ProviderResult<String> {
        let token = self.get_token().await?;
        let mut guard = self.record.lock().await;
        let record = guard
            .as_mut()
            .ok_or(ProviderError::NoCredentials("antigravity"))?;
        if let Some(project) = record.project_id.as_deref()
            && !project.trim().is_empty()
        {
            return Ok(project.to_string());
        }
        let discovered = discover_project_id(DAILY_BASE_URL, ANTIGRAVITY_USER_AGENT, &token)
            .await?
            .unwrap_or_else(random_project_id);
        record.project_id = Some(discovered.clone());
        self.store.save(record)?;
        Ok(discovered)
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
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
            ],
            None,
        )
        .await?;
        record.apply_refresh(
            tokens.access_token,
            tokens.refresh_token,
            tokens.expires_in,
            tokens.token_type,
            tokens.scope,
        );
        self.store.save(record)?;
        Ok(record.access_token.clone())
    }
}

#[async_trait]
impl Authenticator for AntigravityAuthenticator {
    fn provider(&self) -> ProviderType {
        ProviderType::Antigravity
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
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("code_challenge_method", "S256"),
                ("code_challenge", &pair.challenge),
                ("state", &state),
            ],
        );
        println!("Open this URL to authorize Antigravity access:\n{auth_url}");

        let callback = wait_for_callback(REDIRECT_PORT, Some(&state)).await?;
        let tokens = post_token_form(
            TOKEN_URL,
            &[
                ("grant_type", "authorization_code"),
                ("code", &callback.code),
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
                ("redirect_uri", &redirect_uri),
                ("code_verifier", &pair.verifier),
            ],
            None,
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
        self.store.save(&record)?;
        info!(path = %self.store.path().display(), "antigravity credentials saved");
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
            .ok_or(ProviderError::NoCredentials("antigravity"))?;
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
            .ok_or(ProviderError::NoCredentials("antigravity"))?;
        self.refresh_locked(record).await
    }

    fn is_authenticated(&self) -> bool {
        self.store.exists()
    }

    fn clear(&self) -> ProviderResult<()> {
        self.store.clear()
    }
}

/// Fallback when onboarding yields no project: a synthetic id keeps the
/// sandbox callable.
fn random_project_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    let mut rng = rand::rng();
    rng.fill_bytes(&mut bytes);
    let suffix: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("antigravity-{suffix}")
}
