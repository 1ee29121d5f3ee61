use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;

use aiproxy_protocol::claude::MessagesRequest;
use aiproxy_provider_core::{Provider, ProviderType};
use aiproxy_transform::{NativeRequest, NativeResponse};

use crate::{GatewayState, respond};

/// `GET /anthropic/models` in the Anthropic list shape.
pub(crate) async fn models(State(state): State<GatewayState>) -> Response {
    let Some(provider) = state.factory.get(ProviderType::Kiro) else {
        return respond::error(StatusCode::NOT_FOUND, "kiro provider not registered");
    };
    match provider.list_models().await {
        Ok(listed) => {
            let data: Vec<serde_json::Value> = listed
                .into_iter()
                .map(|model| {
                    serde_json::json!({
                        "type": "model",
                        "id": model.id,
                        "display_name": model.display_name.unwrap_or_else(|| model.id.clone()),
                    })
                })
                .collect();
            respond::json(
                StatusCode::OK,
                &serde_json::json!({
                    "data": data,
                    "has_more": false,
                }),
            )
        }
        Err(err) => respond::provider_error(&err),
    }
}

/// `POST /anthropic/messages`: the Anthropic request is parsed directly and
/// dispatched to Kiro, honoring its `stream` flag.
pub(crate) async fn messages(State(state): State<GatewayState>, body: Bytes) -> Response {
    let request: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return respond::error(StatusCode::BAD_REQUEST, &format!("invalid request: {err}"));
        }
    };
    if request.messages.is_empty() {
        return respond::error(StatusCode::BAD_REQUEST, "messages must not be empty");
    }
    let Some(provider) = state.factory.get(ProviderType::Kiro) else {
        return respond::error(StatusCode::NOT_FOUND, "kiro provider not registered");
    };

    let model = request.model.clone();
    let stream = request.is_stream();
    let native = NativeRequest::Claude(request);

    if stream {
        match provider.generate_content_stream(&model, &native).await {
            Ok(upstream) => {
                state.factory.record_success(&model, ProviderType::Kiro);
                respond::sse_passthrough(upstream)
            }
            Err(err) => respond::provider_error(&err),
        }
    } else {
        match provider.generate_content(&model, &native).await {
            Ok(NativeResponse::Claude(resp)) => {
                state.factory.record_success(&model, ProviderType::Kiro);
                respond::json(StatusCode::OK, &resp)
            }
            Ok(_) => respond::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "unexpected response shape from kiro provider",
            ),
            Err(err) => respond::provider_error(&err),
        }
    }
}
