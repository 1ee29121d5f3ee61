use std::time::Instant;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// No content chunk seen yet.
    Initial,
    /// First content chunk buffered; watching for a prefix duplicate.
    Stuttering,
    /// Heuristic disarmed; chunks pass through.
    NormalFlow,
    /// Recoverable error seen; waiting for the next good chunk.
    Recovering,
    Terminating,
}

/// Per-stream bookkeeping for the stuttering filter and recovery.
#[derive(Debug)]
pub struct StreamState {
    pub current: StreamPhase,
    /// Raw `data:` line of the buffered first content chunk.
    pub buffer: Option<String>,
    pub chunk_count: u64,
    pub error_count: u32,
    pub start_time: Instant,
    pub last_valid_chunk: Option<Instant>,
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            current: StreamPhase::Initial,
            buffer: None,
            chunk_count: 0,
            error_count: 0,
            start_time: Instant::now(),
            last_valid_chunk: None,
        }
    }

    pub fn transition(&mut self, to: StreamPhase, reason: &str) {
        if self.current == to {
            return;
        }
        debug!(from = ?self.current, to = ?to, reason, "stream state transition");
        self.current = to;
    }

    pub fn note_valid_chunk(&mut self) {
        self.chunk_count += 1;
        self.last_valid_chunk = Some(Instant::now());
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}
