//! Runtime request plane: error classification, resilience (circuit breaker
//! and backoff retry), and the SSE streaming pipeline with stuttering repair.

pub mod breaker;
pub mod classify;
pub mod retry;
pub mod stream;

pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use classify::is_non_retryable_message;
pub use retry::{RetryConfig, retry_with_backoff};
pub use stream::adapt::adapt_native_stream;
pub use stream::chunk::{ChunkKind, ParsedChunk};
pub use stream::pipeline::{PipelineConfig, PipelineOutcome, StreamPipeline};
pub use stream::recovery::{RecoveryAction, RecoveryManager, StreamErrorKind};
pub use stream::state::{StreamPhase, StreamState};
