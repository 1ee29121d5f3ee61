//! HTTP surface: the OpenAI-compatible aggregate routes, provider-pinned
//! mirrors, and the native Gemini and Anthropic passthroughs.

mod anthropic;
mod gemini;
mod openai;
mod respond;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use aiproxy_common::GatewayConfig;
use aiproxy_core::{CircuitBreaker, CircuitBreakerConfig};
use aiproxy_provider_core::{Provider, ProviderFactory, ProviderType};

#[derive(Clone)]
pub struct GatewayState {
    pub factory: Arc<ProviderFactory>,
    pub config: GatewayConfig,
    breakers: Arc<HashMap<ProviderType, Arc<CircuitBreaker>>>,
}

impl GatewayState {
    pub fn new(factory: Arc<ProviderFactory>, config: GatewayConfig) -> Self {
        let breakers = [
            ProviderType::Qwen,
            ProviderType::GeminiCli,
            ProviderType::Kiro,
            ProviderType::Antigravity,
            ProviderType::Iflow,
        ]
        .into_iter()
        .map(|provider| {
            (
                provider,
                Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            )
        })
        .collect();
        Self {
            factory,
            config,
            breakers: Arc::new(breakers),
        }
    }

    pub(crate) fn breaker(&self, provider: ProviderType) -> Arc<CircuitBreaker> {
        self.breakers
            .get(&provider)
            .cloned()
            .unwrap_or_default()
    }
}

pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health))
        // OpenAI-compatible aggregate surface.
        .route("/v1/models", get(openai::models_aggregate))
        .route("/v1/chat/completions", post(openai::chat_completions_aggregate))
        // Provider-pinned mirrors of the same surface.
        .route("/{provider}/v1/models", get(openai::models_pinned))
        .route(
            "/{provider}/v1/chat/completions",
            post(openai::chat_completions_pinned),
        )
        // Native Gemini surface.
        .route("/gemini/models", get(gemini::models))
        .route("/gemini/models/{*rest}", post(gemini::generate))
        // Native Anthropic surface over Kiro.
        .route("/anthropic/models", get(anthropic::models))
        .route("/anthropic/messages", post(anthropic::messages))
        .fallback(not_found)
        .layer(middleware::from_fn(cors))
        .layer(middleware::from_fn(trace_request))
        .with_state(state)
}

/// Per-request trace id on the access log line.
async fn trace_request(req: Request<Body>, next: Next) -> Response {
    let trace_id = uuid::Uuid::now_v7().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let resp = next.run(req).await;
    tracing::info!(
        %trace_id,
        %method,
        path,
        status = resp.status().as_u16(),
        "request"
    );
    resp
}

async fn health(State(state): State<GatewayState>) -> Response {
    let mut providers = serde_json::Map::new();
    for provider_type in state.factory.provider_types() {
        let healthy = match state.factory.get(provider_type) {
            Some(provider) => provider.is_healthy().await,
            None => false,
        };
        providers.insert(
            provider_type.to_string(),
            serde_json::Value::Bool(healthy),
        );
    }
    respond::json(
        StatusCode::OK,
        &serde_json::json!({"status": "ok", "providers": providers}),
    )
}

async fn not_found() -> Response {
    respond::error(StatusCode::NOT_FOUND, "not found")
}

/// Every route answers OPTIONS with 200 and carries the CORS headers.
async fn cors(req: Request<Body>, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut resp = StatusCode::OK.into_response();
        apply_cors(&mut resp);
        return resp;
    }
    let mut resp = next.run(req).await;
    apply_cors(&mut resp);
    resp
}

fn apply_cors(resp: &mut Response) {
    let headers = resp.headers_mut();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type,Authorization"),
    );
}
