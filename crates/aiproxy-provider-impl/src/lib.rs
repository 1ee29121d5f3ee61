//! Driver implementations for the five upstream providers.

pub mod providers;

pub use providers::antigravity::AntigravityProvider;
pub use providers::geminicli::GeminiCliProvider;
pub use providers::http_client::{HttpSettings, init_http_settings};
pub use providers::iflow::IflowProvider;
pub use providers::kiro::KiroProvider;
pub use providers::qwen::QwenProvider;
