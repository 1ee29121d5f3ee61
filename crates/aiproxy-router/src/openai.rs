use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use tracing::{info, warn};

use aiproxy_core::{
    PipelineConfig, RetryConfig, StreamPipeline, adapt_native_stream, retry_with_backoff,
};
use aiproxy_protocol::openai::{ChatCompletionRequest, Model, ModelList};
use aiproxy_provider_core::{
    Provider, ProviderError, ProviderResult, ProviderType, format_openai_models,
};
use aiproxy_transform::converter_for;

use crate::{GatewayState, respond};

pub(crate) async fn models_aggregate(State(state): State<GatewayState>) -> Response {
    let mut data: Vec<Model> = Vec::new();
    for provider_type in state.factory.provider_types() {
        let Some(provider) = state.factory.get(provider_type) else {
            continue;
        };
        match provider.list_models().await {
            Ok(models) => data.extend(format_openai_models(&models, provider_type)),
            Err(err) => {
                warn!(provider = %provider_type, error = %err, "model listing skipped");
            }
        }
    }
    respond::json(StatusCode::OK, &ModelList::new(data))
}

pub(crate) async fn models_pinned(
    State(state): State<GatewayState>,
    Path(provider): Path<String>,
) -> Response {
    let Some(provider_type) = ProviderType::parse(&provider) else {
        return respond::error(StatusCode::NOT_FOUND, "unknown provider");
    };
    let Some(provider) = state.factory.get(provider_type) else {
        return respond::error(StatusCode::NOT_FOUND, "provider not registered");
    };
    match provider.list_models().await {
        Ok(models) => respond::json(
            StatusCode::OK,
            &ModelList::new(format_openai_models(&models, provider_type)),
        ),
        Err(err) => respond::provider_error(&err),
    }
}

pub(crate) async fn chat_completions_aggregate(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Response {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(resp) => return resp,
    };

    let primary = match state.factory.get_by_model(&request.model) {
        Ok(provider) => provider,
        Err(err) => return respond::provider_error(&err),
    };
    let primary_type = primary.name();

    match dispatch(&state, primary, &request).await {
        Ok(resp) => resp,
        Err(primary_err) => {
            // Streams and auth failures do not fail over; everything else
            // gets exactly one alternate provider.
            if request.is_stream() || primary_err.is_unauthorized() {
                return respond::provider_error(&primary_err);
            }
            let Ok(alternate) = state.factory.get_alternative(&request.model, primary_type)
            else {
                return respond::provider_error(&primary_err);
            };
            let alternate_type = alternate.name();
            warn!(
                model = %request.model,
                failed = %primary_type,
                alternate = %alternate_type,
                error = %primary_err,
                "primary provider failed; trying alternate"
            );
            match dispatch(&state, alternate, &request).await {
                Ok(resp) => resp,
                Err(alternate_err) => respond::error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!(
                        "{primary_type} failed: {primary_err}; {alternate_type} failed: {alternate_err}"
                    ),
                ),
            }
        }
    }
}

pub(crate) async fn chat_completions_pinned(
    State(state): State<GatewayState>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Response {
    let Some(provider_type) = ProviderType::parse(&provider) else {
        return respond::error(StatusCode::NOT_FOUND, "unknown provider");
    };
    let Some(provider) = state.factory.get(provider_type) else {
        return respond::error(StatusCode::NOT_FOUND, "provider not registered");
    };
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(resp) => return resp,
    };
    match dispatch(&state, provider, &request).await {
        Ok(resp) => resp,
        Err(err) => respond::provider_error(&err),
    }
}

fn parse_request(body: &Bytes) -> Result<ChatCompletionRequest, Response> {
    let request: ChatCompletionRequest = serde_json::from_slice(body)
        .map_err(|err| respond::error(StatusCode::BAD_REQUEST, &format!("invalid request: {err}")))?;
    if request.model.trim().is_empty() {
        return Err(respond::error(StatusCode::BAD_REQUEST, "model is required"));
    }
    if request.messages.is_empty() {
        return Err(respond::error(
            StatusCode::BAD_REQUEST,
            "messages must not be empty",
        ));
    }
    Ok(request)
}

/// One provider attempt: convert, call (behind the provider's circuit
/// breaker, with backoff for non-stream calls), translate back, record the
/// success for routing stickiness.
async fn dispatch(
    state: &GatewayState,
    provider: Arc<dyn Provider>,
    request: &ChatCompletionRequest,
) -> ProviderResult<Response> {
    let provider_type = provider.name();
    let breaker = state.breaker(provider_type);
    if !breaker.can_execute() {
        return Err(ProviderError::Upstream {
            status: 503,
            message: format!("{provider_type} circuit breaker is open"),
        });
    }

    let converter = converter_for(provider.protocol());
    let native = converter
        .from_openai_request(request)
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let model = request.model.as_str();

    if request.is_stream() {
        let upstream = match provider.generate_content_stream(model, &native).await {
            Ok(upstream) => upstream,
            Err(err) => {
                breaker.record_failure();
                return Err(err);
            }
        };
        breaker.record_success();
        state.factory.record_success(model, provider_type);
        info!(provider = %provider_type, model, "stream started");

        let adapted = adapt_native_stream(provider.protocol(), upstream, model);
        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(state.config.streaming_buffer_size);
        let pipeline = StreamPipeline::new(PipelineConfig {
            max_errors: state.config.streaming_max_errors,
        });
        tokio::spawn(async move {
            let outcome = pipeline.run(adapted, tx).await;
            match outcome.error {
                // The client went away first; nothing to report.
                Some(ProviderError::Canceled) => {
                    tracing::debug!("client disconnected; stream closed silently");
                }
                Some(error) => warn!(error = %error, "stream terminated on error"),
                None => {}
            }
        });
        return Ok(respond::sse(rx));
    }

    let retry = RetryConfig::default();
    let result = retry_with_backoff(&retry, || {
        let native = native.clone();
        let provider = provider.clone();
        async move { provider.generate_content(model, &native).await }
    })
    .await;
    let native_resp = match result {
        Ok(resp) => resp,
        Err(err) => {
            breaker.record_failure();
            return Err(err);
        }
    };
    breaker.record_success();

    let openai = converter
        .to_openai_response(native_resp, model)
        .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
    state.factory.record_success(model, provider_type);
    Ok(respond::json(StatusCode::OK, &openai))
}
