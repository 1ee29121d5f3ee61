//! Core provider abstractions for the gateway.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP
//! client. Drivers implement [`Provider`] and [`Authenticator`]; a higher
//! layer performs the IO and feeds streams back through the pipeline.

pub mod auth;
pub mod credential;
pub mod errors;
pub mod factory;
pub mod pkce;
pub mod provider;
pub mod store;

pub use auth::{Authenticator, TokenResponse};
pub use credential::{CredentialRecord, EXPIRY_SKEW};
pub use errors::{ProviderError, ProviderResult};
pub use factory::{ProviderFactory, format_openai_models};
pub use pkce::PkcePair;
pub use provider::{ByteStream, ModelInfo, Provider, ProviderType};
pub use store::CredentialStore;
