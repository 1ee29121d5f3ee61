use std::convert::Infallible;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;

use aiproxy_provider_core::{ByteStream, ProviderError};

pub(crate) fn json<T: Serialize>(status: StatusCode, body: &T) -> Response {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub(crate) fn error(status: StatusCode, message: &str) -> Response {
    json(
        status,
        &serde_json::json!({"error": {"message": message, "type": "error"}}),
    )
}

/// Map a provider-plane error onto the HTTP surface. Auth errors carry
/// re-auth guidance and never leak token material.
pub(crate) fn provider_error(err: &ProviderError) -> Response {
    match err {
        ProviderError::NoCredentials(_)
        | ProviderError::Unauthorized(_)
        | ProviderError::RefreshFailed(_) => error(StatusCode::UNAUTHORIZED, &err.to_string()),
        ProviderError::NoProvider(model) => error(
            StatusCode::BAD_REQUEST,
            &format!("no provider supports model {model}"),
        ),
        ProviderError::InvalidConfig(message) => error(StatusCode::BAD_REQUEST, message),
        _ => error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

/// Native passthrough: forward a provider stream to the client as-is. A
/// mid-stream upstream error ends the response (logged, not forwarded — the
/// native dialects have no in-band error frame once bytes have been sent).
pub(crate) fn sse_passthrough(mut upstream: ByteStream) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        while let Some(item) = upstream.recv().await {
            match item {
                Ok(chunk) => {
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "native stream ended on upstream error");
                    break;
                }
            }
        }
    });
    sse(rx)
}

/// Whole SSE frames from the channel, flushed as they arrive.
pub(crate) fn sse(rx: tokio::sync::mpsc::Receiver<Bytes>) -> Response {
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
