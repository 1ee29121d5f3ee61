use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use aiproxy_provider_core::{
    Authenticator, CredentialRecord, CredentialStore, ProviderError, ProviderResult, ProviderType,
};

use crate::providers::http_client::{SharedClientKind, client_for};
use crate::providers::upstream::map_wreq_error;

use super::DEFAULT_REGION;

const DEFAULT_START_URL: &str = "https://view.awsapps.com/start";
const DEVICE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const CLIENT_NAME: &str = "aiproxy-kiro";
const OIDC_SCOPES: &[&str] = &["codewhisperer:completions", "codewhisperer:conversations"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientResponse {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    client_secret_expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceAuthorizationResponse {
    device_code: String,
    #[serde(default)]
    user_code: Option<String>,
    #[serde(default)]
    verification_uri: Option<String>,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    #[serde(default)]
    interval: Option<u64>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SsoTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// AWS SSO OIDC authenticator for the CodeWhisperer surface. Registration
/// fields (`region`, `start_url`, `client_id`, `client_secret`) are carried
/// verbatim on the credential record.
pub struct KiroAuthenticator {
    store: CredentialStore,
    record: Mutex<Option<CredentialRecord>>,
}

impl KiroAuthenticator {
    pub fn new() -> ProviderResult<Self> {
        Ok(Self {
            store: CredentialStore::for_provider(ProviderType::Kiro)?,
            record: Mutex::new(None),
        })
    }

    pub fn with_store(store: CredentialStore) -> Self {
        Self {
            store,
            record: Mutex::new(None),
        }
    }

    pub(crate) async fn region(&self) -> Option<String> {
        let mut guard = self.record.lock().await;
        if guard.is_none() {
            *guard = self.store.load().ok().flatten();
        }
        guard.as_ref().and_then(|record| record.region.clone())
    }

    async fn refresh_locked(&self, record: &mut CredentialRecord) -> ProviderResult<String> {
        let refresh_token = record
            .refresh_token
            .clone()
            .ok_or_else(|| ProviderError::RefreshFailed("no refresh token stored".to_string()))?;
        let client_id = record
            .client_id
            .clone()
            .ok_or_else(|| ProviderError::RefreshFailed("no clientId stored".to_string()))?;
        let client_secret = record
            .client_secret
            .clone()
            .ok_or_else(|| ProviderError::RefreshFailed("no clientSecret stored".to_string()))?;
        let region = record.region.as_deref().unwrap_or(DEFAULT_REGION);

        let tokens = post_oidc::<SsoTokenResponse>(
            region,
            "/token",
            serde_json::json!({
                "grantType": "refresh_token",
                "refreshToken": refresh_token,
                "clientId": client_id,
                "clientSecret": client_secret,
            }),
        )
        .await?;
        record.apply_refresh(
            tokens.access_token,
            tokens.refresh_token,
            tokens.expires_in,
            tokens.token_type,
            None,
        );
        self.store.save(record)?;
        Ok(record.access_token.clone())
    }
}

#[async_trait]
impl Authenticator for KiroAuthenticator {
    fn provider(&self) -> ProviderType {
        ProviderType::Kiro
    }

    fn credentials_path(&self) -> PathBuf {
        self.store.path().to_path_buf()
    }

    /// SSO OIDC device flow: register a public client, start device
    /// authorization, poll the token endpoint until the user approves.
    async fn authenticate(&self) -> ProviderResult<()> {
        let region = self
            .region()
            .await
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let start_url = {
            let guard = self.record.lock().await;
            guard
                .as_ref()
                .and_then(|record| record.start_url.clone())
                .unwrap_or_else(|| DEFAULT_START_URL.to_string())
        };

        let registration = post_oidc::<RegisterClientResponse>(
            &region,
            "/client/register",
            serde_json::json!({
                "clientName": CLIENT_NAME,
                "clientType": "public",
                "scopes": OIDC_SCOPES,
            }),
        )
        .await?;

        let device = post_oidc::<DeviceAuthorizationResponse>(
            &region,
            "/device_authorization",
            serde_json::json!({
                "clientId": registration.client_id,
                "clientSecret": registration.client_secret,
                "startUrl": start_url,
            }),
        )
        .await?;

        let verification = device
            .verification_uri_complete
            .or(device.verification_uri)
            .unwrap_or_default();
        match device.user_code {
            Some(code) => println!("Open {verification} and enter code {code}"),
            None => println!("Open {verification} to approve Kiro access"),
        }

        let interval = Duration::from_secs(device.interval.unwrap_or(5).max(1));
        let attempts = device.expires_in.unwrap_or(600) / interval.as_secs().max(1);
        let mut tokens = None;
        for _ in 0..attempts {
            tokio::time::sleep(interval).await;
            match post_oidc::<SsoTokenResponse>(
                &region,
                "/token",
                serde_json::json!({
                    "grantType": DEVICE_GRANT,
                    "deviceCode": device.device_code,
                    "clientId": registration.client_id,
                    "clientSecret": registration.client_secret,
                }),
            )
            .await
            {
                Ok(response) => {
                    tokens = Some(response);
                    break;
                }
                // authorization_pending / slow_down come back as refresh
                // failures; keep polling until the device code expires.
                Err(ProviderError::RefreshFailed(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        let tokens = tokens.ok_or_else(|| {
            ProviderError::Other("device authorization expired before approval".to_string())
        })?;

        let mut record = CredentialRecord {
            region: Some(region),
            start_url: Some(start_url),
            client_id: Some(registration.client_id),
            client_secret: Some(registration.client_secret),
            registration_expires_at: registration
                .client_secret_expires_at
                .map(|at| at.to_string()),
            ..Default::default()
        };
        record.apply_refresh(
            tokens.access_token,
            tokens.refresh_token,
            tokens.expires_in,
            tokens.token_type,
            None,
        );
        self.store.save(&record)?;
        info!(path = %self.store.path().display(), "kiro credentials saved");
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
            .ok_or(ProviderError::NoCredentials("kiro"))?;
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
            .ok_or(ProviderError::NoCredentials("kiro"))?;
        self.refresh_locked(record).await
    }

    fn is_authenticated(&self) -> bool {
        self.store.exists()
    }

    fn clear(&self) -> ProviderResult<()> {
        self.store.clear()
    }
}

async fn post_oidc<T: serde::de::DeserializeOwned>(
    region: &str,
    path: &str,
    body: serde_json::Value,
) -> ProviderResult<T> {
    let client = client_for(SharedClientKind::NonStream)?;
    let url = format!("https://oidc.{region}.amazonaws.com{path}");
    let resp = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json")
        .body(serde_json::to_vec(&body).map_err(|err| ProviderError::Other(err.to_string()))?)
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
