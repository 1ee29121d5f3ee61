#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    MalformedJson,
    NetworkTimeout,
    InvalidChunk,
    ParsingFailure,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Drop the chunk.
    Skip,
    /// Treat as a no-op.
    Continue,
    /// Enter the recovering phase and keep reading.
    Retry,
    /// Stop the stream and surface the error.
    Terminate,
}

/// Maps stream-level errors to actions. Timeouts are retried until the error
/// budget is exhausted; everything unrecognized terminates.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryManager {
    pub max_errors: u32,
}

impl RecoveryManager {
    pub fn new(max_errors: u32) -> Self {
        Self { max_errors }
    }

    pub fn action_for(&self, kind: StreamErrorKind, error_count: u32) -> RecoveryAction {
        match kind {
            StreamErrorKind::MalformedJson => RecoveryAction::Skip,
            StreamErrorKind::NetworkTimeout => {
                if error_count < self.max_errors {
                    RecoveryAction::Retry
                } else {
                    RecoveryAction::Terminate
                }
            }
            StreamErrorKind::InvalidChunk => RecoveryAction::Continue,
            StreamErrorKind::ParsingFailure => RecoveryAction::Skip,
            StreamErrorKind::Unknown => RecoveryAction::Terminate,
        }
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_the_documented_actions() {
        let manager = RecoveryManager::new(3);
        assert_eq!(
            manager.action_for(StreamErrorKind::MalformedJson, 0),
            RecoveryAction::Skip
        );
        assert_eq!(
            manager.action_for(StreamErrorKind::InvalidChunk, 0),
            RecoveryAction::Continue
        );
        assert_eq!(
            manager.action_for(StreamErrorKind::ParsingFailure, 0),
            RecoveryAction::Skip
        );
        assert_eq!(
            manager.action_for(StreamErrorKind::Unknown, 0),
            RecoveryAction::Terminate
        );
    }

    #[test]
    fn timeouts_retry_until_the_budget_is_spent() {
        let manager = RecoveryManager::new(3);
        assert_eq!(
            manager.action_for(StreamErrorKind::NetworkTimeout, 2),
            RecoveryAction::Retry
        );
        assert_eq!(
            manager.action_for(StreamErrorKind::NetworkTimeout, 3),
            RecoveryAction::Terminate
        );
    }
}
