use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;

use aiproxy_protocol::gemini::{GeminiModel, GeminiModelList, GenerateContentRequest};
use aiproxy_provider_core::{Provider, ProviderType};
use aiproxy_transform::{NativeRequest, NativeResponse};

use crate::{GatewayState, respond};

/// `GET /gemini/models` in the Generative-AI `v1beta` shape.
pub(crate) async fn models(State(state): State<GatewayState>) -> Response {
    let Some(provider) = state.factory.get(ProviderType::GeminiCli) else {
        return respond::error(StatusCode::NOT_FOUND, "gemini provider not registered");
    };
    match provider.list_models().await {
        Ok(listed) => {
            let models = listed
                .into_iter()
                .map(|model| GeminiModel {
                    name: format!("models/{}", model.id),
                    display_name: model.display_name,
                    description: None,
                    input_token_limit: None,
                    output_token_limit: None,
                    supported_generation_methods: Some(vec![
                        "generateContent".to_string(),
                        "streamGenerateContent".to_string(),
                    ]),
                })
                .collect();
            respond::json(StatusCode::OK, &GeminiModelList { models })
        }
        Err(err) => respond::provider_error(&err),
    }
}

/// `POST /gemini/models/{model}:generateContent` and
/// `:streamGenerateContent`. Bodies are Gemini-native and pass through.
pub(crate) async fn generate(
    State(state): State<GatewayState>,
    Path(rest): Path<String>,
    body: Bytes,
) -> Response {
    let Some((model, action)) = rest.split_once(':') else {
        return respond::error(StatusCode::NOT_FOUND, "expected models/{model}:{action}");
    };
    let Some(provider) = state.factory.get(ProviderType::GeminiCli) else {
        return respond::error(StatusCode::NOT_FOUND, "gemini provider not registered");
    };
    let request: GenerateContentRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return respond::error(StatusCode::BAD_REQUEST, &format!("invalid request: {err}"));
        }
    };
    let native = NativeRequest::Gemini(request);

    match action {
        "generateContent" => match provider.generate_content(model, &native).await {
            Ok(NativeResponse::Gemini(value)) => respond::json(StatusCode::OK, &value),
            Ok(_) => respond::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "unexpected response shape from gemini provider",
            ),
            Err(err) => respond::provider_error(&err),
        },
        "streamGenerateContent" => match provider.generate_content_stream(model, &native).await {
            Ok(upstream) => {
                state
                    .factory
                    .record_success(model, ProviderType::GeminiCli);
                respond::sse_passthrough(upstream)
            }
            Err(err) => respond::provider_error(&err),
        },
        _ => respond::error(StatusCode::NOT_FOUND, "unsupported action"),
    }
}
