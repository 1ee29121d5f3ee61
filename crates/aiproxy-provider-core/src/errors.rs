use std::error::Error;
use std::fmt;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Closed error set for the provider plane. Retryability is a property of
/// the variant, not of message text; the substring classifier in the core
/// crate only exists to sort raw transport messages into these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// No stored credentials; the caller should surface re-auth guidance.
    NoCredentials(&'static str),
    RefreshFailed(String),
    /// Upstream rejected the token (HTTP 401).
    Unauthorized(String),
    Upstream { status: u16, message: String },
    NetworkTimeout(String),
    Network(String),
    MalformedResponse(String),
    NoProvider(String),
    InvalidConfig(String),
    Canceled,
    Other(String),
}

impl ProviderError {
    pub fn retryable(&self) -> bool {
        match self {
            ProviderError::NetworkTimeout(_) | ProviderError::Network(_) => true,
            ProviderError::Upstream { status, .. } => *status >= 500,
            ProviderError::NoCredentials(_)
            | ProviderError::RefreshFailed(_)
            | ProviderError::Unauthorized(_)
            | ProviderError::MalformedResponse(_)
            | ProviderError::NoProvider(_)
            | ProviderError::InvalidConfig(_)
            | ProviderError::Canceled
            | ProviderError::Other(_) => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ProviderError::Unauthorized(_) | ProviderError::Upstream { status: 401, .. }
        )
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NoCredentials(provider) => {
                write!(f, "no credentials for {provider}; run the auth flow first")
            }
            ProviderError::RefreshFailed(msg) => write!(f, "token refresh failed: {msg}"),
            ProviderError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            ProviderError::Upstream { status, message } => {
                write!(f, "upstream error {status}: {message}")
            }
            ProviderError::NetworkTimeout(msg) => write!(f, "network timeout: {msg}"),
            ProviderError::Network(msg) => write!(f, "network error: {msg}"),
            ProviderError::MalformedResponse(msg) => write!(f, "malformed response: {msg}"),
            ProviderError::NoProvider(model) => write!(f, "no provider for model {model}"),
            ProviderError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            ProviderError::Canceled => write!(f, "request canceled"),
            ProviderError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for ProviderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_the_variant() {
        assert!(ProviderError::NetworkTimeout("t".into()).retryable());
        assert!(
            ProviderError::Upstream {
                status: 502,
                message: "bad gateway".into()
            }
            .retryable()
        );
        assert!(
            !ProviderError::Upstream {
                status: 404,
                message: "not found".into()
            }
            .retryable()
        );
        assert!(!ProviderError::Unauthorized("expired".into()).retryable());
        assert!(!ProviderError::Canceled.retryable());
    }
}
