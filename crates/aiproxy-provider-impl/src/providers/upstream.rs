use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;

use aiproxy_provider_core::{Authenticator, ByteStream, ProviderError, ProviderResult};

use super::http_client;

pub(crate) fn map_wreq_error(err: wreq::Error) -> ProviderError {
    if err.is_timeout() {
        return ProviderError::NetworkTimeout(err.to_string());
    }
    ProviderError::Network(err.to_string())
}

/// Classify a non-success upstream status, keeping the body for diagnostics
/// (tokens never appear in upstream error bodies).
pub(crate) fn error_for_status(status: u16, body: &[u8]) -> ProviderError {
    let message = String::from_utf8_lossy(body).into_owned();
    if status == 401 {
        return ProviderError::Unauthorized(message);
    }
    ProviderError::Upstream { status, message }
}

/// Issue a request with the current token; on an upstream 401, force one
/// refresh and resend with the new token. A second 401 surfaces.
pub(crate) async fn send_with_auth_retry<F>(
    auth: &Arc<dyn Authenticator>,
    build: F,
) -> ProviderResult<wreq::Response>
where
    F: Fn(&str) -> wreq::RequestBuilder,
{
    let token = auth.get_token().await?;
    let resp = build(&token).send().await.map_err(map_wreq_error)?;
    if resp.status().as_u16() != 401 {
        return Ok(resp);
    }
    tracing::warn!(provider = %auth.provider(), "upstream 401; refreshing token and retrying once");
    let token = auth.force_refresh().await?;
    build(&token).send().await.map_err(map_wreq_error)
}

/// Bridge a streaming response body onto an mpsc channel. Clean EOF just
/// closes the channel; a read-idle timeout or transport failure is sent as a
/// final `Err` item so the pipeline's recovery manager sees it. The reader
/// stops as soon as the receiver is dropped, so a canceled request reads at
/// most one further chunk.
pub(crate) fn stream_body(resp: wreq::Response) -> ByteStream {
    let idle = http_client::settings().read_timeout;
    let (tx, rx) = tokio::sync::mpsc::channel::<ProviderResult<Bytes>>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::time::timeout(idle, stream.next()).await;
            let item = match next {
                Ok(item) => item,
                Err(_) => {
                    let _ = tx
                        .send(Err(ProviderError::NetworkTimeout(format!(
                            "no upstream data for {}s",
                            idle.as_secs()
                        ))))
                        .await;
                    break;
                }
            };
            let Some(item) = item else {
                break;
            };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = tx.send(Err(map_wreq_error(err))).await;
                    break;
                }
            };
            if tx.send(Ok(chunk)).await.is_err() {
                break;
            }
        }
    });
    rx
}
