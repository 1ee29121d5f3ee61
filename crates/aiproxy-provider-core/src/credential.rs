use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A token within five minutes of expiry is treated as expired so in-flight
/// requests never carry a token that dies mid-call.
pub const EXPIRY_SKEW_MS: i64 = 5 * 60 * 1000;
pub const EXPIRY_SKEW: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// One provider's persisted credentials.
///
/// Expiry is kept as epoch milliseconds internally. On disk the record is a
/// compatibility seam with external CLI tools: `expires_at` is accepted as
/// either an RFC-3339 string or an epoch-ms integer (plus the legacy
/// `expiry_date` epoch-ms field), and saves write both forms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_ms: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    /// Derived LLM bearer where the provider prefers one over the raw OAuth
    /// token (iFlow's sk-key from the user-info endpoint).
    pub api_key: Option<String>,
    /// Endpoint base stored with the credential (Qwen's `resource_url`).
    pub resource_url: Option<String>,
    /// Cloud Code Assist companion project (Gemini and Antigravity).
    pub project_id: Option<String>,
    pub email: Option<String>,
    pub user_id: Option<String>,
    // AWS SSO registration (Kiro).
    pub region: Option<String>,
    pub start_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub registration_expires_at: Option<String>,
}

impl CredentialRecord {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        if self.access_token.is_empty() && self.api_key.is_none() {
            return false;
        }
        match self.expires_at_ms {
            Some(expires_at) => now_ms + EXPIRY_SKEW_MS < expires_at,
            // Records without an expiry (plain api-key) never go stale.
            None => true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(epoch_ms())
    }

    /// Apply a token-endpoint response: a fresh refresh token replaces the
    /// old one, its absence keeps the old one.
    pub fn apply_refresh(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
        token_type: Option<String>,
        scope: Option<String>,
    ) {
        self.access_token = access_token;
        if refresh_token.is_some() {
            self.refresh_token = refresh_token;
        }
        if let Some(expires_in) = expires_in_secs {
            self.expires_at_ms = Some(epoch_ms() + expires_in * 1000);
        }
        if token_type.is_some() {
            self.token_type = token_type;
        }
        if scope.is_some() {
            self.scope = scope;
        }
    }
}

pub fn epoch_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn format_rfc3339(ms: i64) -> Option<String> {
    let ts = OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok()?;
    ts.format(&Rfc3339).ok()
}

fn parse_expires_at(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::String(text) => {
            let parsed = OffsetDateTime::parse(text, &Rfc3339).ok()?;
            Some((parsed.unix_timestamp_nanos() / 1_000_000) as i64)
        }
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

#[derive(Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    registration_expires_at: Option<String>,
}

impl Serialize for CredentialRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let file = CredentialFile {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self
                .expires_at_ms
                .and_then(format_rfc3339)
                .map(JsonValue::String),
            expiry_date: self.expires_at_ms,
            token_type: self.token_type.clone(),
            scope: self.scope.clone(),
            api_key: self.api_key.clone(),
            resource_url: self.resource_url.clone(),
            project_id: self.project_id.clone(),
            email: self.email.clone(),
            user_id: self.user_id.clone(),
            region: self.region.clone(),
            start_url: self.start_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            registration_expires_at: self.registration_expires_at.clone(),
        };
        file.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CredentialRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let file = CredentialFile::deserialize(deserializer)?;
        let expires_at_ms = file
            .expires_at
            .as_ref()
            .and_then(parse_expires_at)
            .or(file.expiry_date);
        Ok(CredentialRecord {
            access_token: file.access_token,
            refresh_token: file.refresh_token,
            expires_at_ms,
            token_type: file.token_type,
            scope: file.scope,
            api_key: file.api_key,
            resource_url: file.resource_url,
            project_id: file.project_id,
            email: file.email,
            user_id: file.user_id,
            region: file.region,
            start_url: file.start_url,
            client_id: file.client_id,
            client_secret: file.client_secret,
            registration_expires_at: file.registration_expires_at,
        })
    }
}
