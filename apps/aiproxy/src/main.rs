mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use aiproxy_common::GatewayConfigPatch;
use aiproxy_provider_core::{Authenticator, ProviderFactory, ProviderType};
use aiproxy_provider_impl::{
    AntigravityProvider, GeminiCliProvider, HttpSettings, IflowProvider, KiroProvider,
    QwenProvider, init_http_settings,
};
use aiproxy_provider_impl::providers::antigravity::AntigravityAuthenticator;
use aiproxy_provider_impl::providers::geminicli::GeminiCliAuthenticator;
use aiproxy_provider_impl::providers::iflow::IflowAuthenticator;
use aiproxy_provider_impl::providers::kiro::KiroAuthenticator;
use aiproxy_provider_impl::providers::qwen::QwenAuthenticator;
use aiproxy_router::{GatewayState, gateway_router};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let mut patch = GatewayConfigPatch::from_env().context("read environment")?;
    patch.overlay(GatewayConfigPatch {
        host: cli.host.clone(),
        port: cli.port,
        debug: cli.debug,
        ..Default::default()
    });
    let config = patch.into_config();

    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    init_http_settings(HttpSettings {
        connect_timeout: Duration::from_secs(5),
        request_timeout: config.request_timeout(),
        streaming_timeout: config.streaming_timeout(),
        read_timeout: config.read_timeout(),
    });

    let qwen_auth = Arc::new(QwenAuthenticator::new()?);
    let gemini_auth = Arc::new(GeminiCliAuthenticator::new()?);
    let antigravity_auth = Arc::new(AntigravityAuthenticator::new()?);
    let kiro_auth = Arc::new(KiroAuthenticator::new()?);
    let iflow_auth = Arc::new(IflowAuthenticator::new()?);

    if let Some(login) = cli.login.as_deref() {
        let auth: Arc<dyn Authenticator> = match ProviderType::parse(login) {
            Some(ProviderType::Qwen) => qwen_auth.clone(),
            Some(ProviderType::GeminiCli) => gemini_auth.clone(),
            Some(ProviderType::Antigravity) => antigravity_auth.clone(),
            Some(ProviderType::Kiro) => kiro_auth.clone(),
            Some(ProviderType::Iflow) => iflow_auth.clone(),
            None => bail!("unknown provider {login}"),
        };
        auth.authenticate().await.context("auth flow")?;
        println!("Credentials written to {}", auth.credentials_path().display());
        return Ok(());
    }

    let factory = Arc::new(ProviderFactory::new());
    factory.register(Arc::new(QwenProvider::new(qwen_auth)));
    factory.register(Arc::new(GeminiCliProvider::new(gemini_auth)));
    factory.register(Arc::new(AntigravityProvider::new(antigravity_auth)));
    factory.register(Arc::new(KiroProvider::new(kiro_auth)));
    factory.register(Arc::new(IflowProvider::new(iflow_auth)));
    factory.populate().await;

    let bind = format!("{}:{}", config.host, config.port);
    let state = GatewayState::new(factory, config);
    let app = gateway_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(%bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
