use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use aiproxy_provider_core::{ProviderError, ProviderResult};

/// Timeouts for the process-wide upstream clients. Installed once at startup;
/// later calls fall back to the defaults below.
#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub streaming_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(300),
            streaming_timeout: Duration::from_secs(900),
            read_timeout: Duration::from_secs(45),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SharedClientKind {
    /// Buffered request/response calls (token endpoints, generate, list).
    NonStream,
    /// SSE bodies; the overall timeout is the streaming budget and per-read
    /// idleness is bounded separately.
    Stream,
}

static SETTINGS: OnceLock<HttpSettings> = OnceLock::new();
static CLIENT_CACHE: OnceLock<Mutex<HashMap<SharedClientKind, wreq::Client>>> = OnceLock::new();

/// Install the timeouts before the first upstream call. Returns false if a
/// client has already been built with earlier settings.
pub fn init_http_settings(settings: HttpSettings) -> bool {
    SETTINGS.set(settings).is_ok()
}

pub(crate) fn settings() -> HttpSettings {
    SETTINGS.get().copied().unwrap_or_default()
}

pub(crate) fn client_for(kind: SharedClientKind) -> ProviderResult<wreq::Client> {
    let cache = CLIENT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache
        .lock()
        .map_err(|_| ProviderError::Other("http client cache lock failed".to_string()))?;

    if let Some(client) = guard.get(&kind) {
        return Ok(client.clone());
    }

    let client = build_client(kind)?;
    guard.insert(kind, client.clone());
    Ok(client)
}

fn build_client(kind: SharedClientKind) -> ProviderResult<wreq::Client> {
    let settings = settings();
    let timeout = match kind {
        SharedClientKind::NonStream => settings.request_timeout,
        SharedClientKind::Stream => settings.streaming_timeout,
    };
    wreq::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(timeout)
        .read_timeout(settings.read_timeout)
        .build()
        .map_err(|err| ProviderError::Other(err.to_string()))
}
