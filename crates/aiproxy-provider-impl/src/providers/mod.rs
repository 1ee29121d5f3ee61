pub mod antigravity;
pub mod geminicli;
pub mod http_client;
pub mod iflow;
pub mod kiro;
pub(crate) mod oauth_common;
pub mod qwen;
pub(crate) mod upstream;
