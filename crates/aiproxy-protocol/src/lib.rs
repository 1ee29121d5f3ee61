//! Wire types for the protocols the gateway speaks.
//!
//! Downstream surfaces are OpenAI chat completions plus native Gemini and
//! Anthropic passthrough; upstream providers speak one of the dialects in
//! [`Proto`]. Types here are strict where the gateway authors the payload and
//! permissive (`serde_json::Value` leaves, flattened extras) where upstreams
//! genuinely vary.

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod qwen;
pub mod sse;

use serde::{Deserialize, Serialize};

/// Wire dialect a provider speaks. A provider has exactly one protocol; many
/// providers may share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    OpenAI,
    Gemini,
    Claude,
    Qwen,
}

impl Proto {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::OpenAI => "openai",
            Proto::Gemini => "gemini",
            Proto::Claude => "claude",
            Proto::Qwen => "qwen",
        }
    }
}

impl std::fmt::Display for Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
