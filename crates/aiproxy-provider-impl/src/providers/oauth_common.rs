use std::time::Duration;

use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use aiproxy_provider_core::{ProviderError, ProviderResult, TokenResponse};

use super::http_client::{SharedClientKind, client_for};
use super::upstream::map_wreq_error;

const CALLBACK_WAIT: Duration = Duration::from_secs(300);
const CALLBACK_PAGE: &str = "<html><body><h3>Authentication complete.</h3>\
You can close this tab and return to the terminal.</body></html>";

/// The parameters an authorization server can hand back on the loopback
/// redirect, decoded in one pass over the query string. Blank values count
/// as absent.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl CallbackQuery {
    pub(crate) fn parse(query: &str) -> Self {
        let mut parsed = Self::default();
        for (key, value) in query.split('&').map(split_pair) {
            let Ok(decoded) = urlencoding::decode(value) else {
                continue;
            };
            let decoded = decoded.trim();
            if decoded.is_empty() {
                continue;
            }
            let slot = match key {
                "code" => &mut parsed.code,
                "state" => &mut parsed.state,
                "error" => &mut parsed.error,
                _ => continue,
            };
            *slot = Some(decoded.to_string());
        }
        parsed
    }
}

fn split_pair(pair: &str) -> (&str, &str) {
    pair.split_once('=').unwrap_or((pair, ""))
}

pub(crate) fn encode_form(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub(crate) fn build_authorize_url(auth_url: &str, params: &[(&str, &str)]) -> String {
    format!(
        "{}?{}",
        auth_url.trim_end_matches('/'),
        encode_form(params)
    )
}

/// POST a form to a token endpoint and parse the standard token response.
/// `basic` adds `Authorization: Basic base64(id:secret)` where the provider
/// requires client authentication that way.
pub(crate) async fn post_token_form(
    token_url: &str,
    pairs: &[(&str, &str)],
    basic: Option<(&str, &str)>,
) -> ProviderResult<TokenResponse> {
    let client = client_for(SharedClientKind::NonStream)?;
    let mut builder = client
        .post(token_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Accept", "application/json")
        .body(encode_form(pairs));
    if let Some((id, secret)) = basic {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"));
        builder = builder.header("Authorization", format!("Basic {encoded}"));
    }
    let resp = builder.send().await.map_err(map_wreq_error)?;
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
    serde_json::from_slice::<TokenResponse>(&bytes)
        .map_err(|err| ProviderError::MalformedResponse(err.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AuthCallback {
    pub code: String,
    pub state: Option<String>,
}

/// Serve the loopback redirect for an interactive flow: accept connections on
/// `127.0.0.1:{port}` until one carries `?code=…`, answer it with a small
/// HTML page, and hand the code back. `expected_state` rejects mismatched
/// round-trips.
pub(crate) async fn wait_for_callback(
    port: u16,
    expected_state: Option<&str>,
) -> ProviderResult<AuthCallback> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|err| ProviderError::Other(format!("bind callback port {port}: {err}")))?;

    let deadline = tokio::time::Instant::now() + CALLBACK_WAIT;
    loop {
        let accept = tokio::time::timeout_at(deadline, listener.accept()).await;
        let Ok(accepted) = accept else {
            return Err(ProviderError::Other(
                "timed out waiting for the OAuth callback".to_string(),
            ));
        };
        let (mut socket, _) = accepted
            .map_err(|err| ProviderError::Other(format!("accept callback: {err}")))?;

        let mut buf = vec![0u8; 8192];
        let read = socket.read(&mut buf).await.unwrap_or(0);
        let request = String::from_utf8_lossy(&buf[..read]);
        let params = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|target| target.split_once('?'))
            .map(|(_, query)| CallbackQuery::parse(query))
            .unwrap_or_default();

        if let Some(error) = params.error {
            respond(&mut socket, 400, &format!("authorization failed: {error}")).await;
            return Err(ProviderError::Other(format!("authorization denied: {error}")));
        }

        let Some(code) = params.code else {
            // Favicon probes and such; keep listening.
            respond(&mut socket, 404, "not found").await;
            continue;
        };
        if let Some(expected) = expected_state
            && params.state.as_deref() != Some(expected)
        {
            respond(&mut socket, 400, "state mismatch").await;
            return Err(ProviderError::Other("oauth state mismatch".to_string()));
        }

        respond(&mut socket, 200, CALLBACK_PAGE).await;
        return Ok(AuthCallback {
            code,
            state: params.state,
        });
    }
}

async fn respond(socket: &mut tokio::net::TcpStream, status: u16, body: &str) {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        _ => "Not Found",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_query_is_decoded_and_trimmed_in_one_pass() {
        let params = CallbackQuery::parse("code=opaque%2Bvalue&state=%20s1%20&ignored=x&error=");
        assert_eq!(params.code.as_deref(), Some("opaque+value"));
        assert_eq!(params.state.as_deref(), Some("s1"));
        assert_eq!(params.error, None);
    }

    #[test]
    fn callback_query_surfaces_a_denial() {
        let params = CallbackQuery::parse("error=access_denied&state=s1");
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.code, None);
    }

    #[test]
    fn form_encoding_escapes_reserved_characters() {
        let form = encode_form(&[("a", "x y"), ("b", "1+2")]);
        assert_eq!(form, "a=x%20y&b=1%2B2");
    }

    #[tokio::test]
    async fn callback_listener_returns_the_code() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("probe port");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let wait = tokio::spawn(async move { wait_for_callback(port, Some("st1")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect");
        stream
            .write_all(b"GET /callback?code=abc-123&state=st1 HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .expect("write");
        let mut out = String::new();
        let _ = stream.read_to_string(&mut out).await;
        assert!(out.starts_with("HTTP/1.1 200"));

        let callback = wait.await.expect("join").expect("callback");
        assert_eq!(callback.code, "abc-123");
        assert_eq!(callback.state.as_deref(), Some("st1"));
    }
}
