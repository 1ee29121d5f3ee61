use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

use aiproxy_protocol::sse::{SseLineReader, done_frame};
use aiproxy_provider_core::{ByteStream, ProviderError};

use super::chunk::{ChunkKind, ParsedChunk};
use super::detector::{PrefixStutterDetector, StutterDetector};
use super::recovery::{RecoveryAction, RecoveryManager, StreamErrorKind};
use super::state::{StreamPhase, StreamState};

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub max_errors: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_errors: 3 }
    }
}

#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub forwarded: u64,
    /// Bytes were written to the client before any failure.
    pub wrote_any: bool,
    /// `Canceled` when the client went away mid-stream; any other error is
    /// what the recovery manager terminated on.
    pub error: Option<ProviderError>,
}

impl PipelineOutcome {
    pub fn client_canceled(&self) -> bool {
        matches!(self.error, Some(ProviderError::Canceled))
    }
}

/// SSE line reader → chunk parser → state machine → stuttering filter →
/// writer. Input is OpenAI-dialect SSE (see `adapt_native_stream`); output is
/// whole `data: …\n\n` frames on the client channel.
pub struct StreamPipeline<D: StutterDetector = PrefixStutterDetector> {
    recovery: RecoveryManager,
    detector: D,
}

impl StreamPipeline<PrefixStutterDetector> {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            recovery: RecoveryManager::new(config.max_errors),
            detector: PrefixStutterDetector,
        }
    }
}

impl<D: StutterDetector> StreamPipeline<D> {
    pub fn with_detector(config: PipelineConfig, detector: D) -> Self {
        Self {
            recovery: RecoveryManager::new(config.max_errors),
            detector,
        }
    }

    /// Drive the stream to completion. A dropped client receiver stops the
    /// loop before the next upstream read and records `Canceled`.
    pub async fn run(&self, mut upstream: ByteStream, tx: Sender<Bytes>) -> PipelineOutcome {
        let mut reader = SseLineReader::new();
        let mut state = StreamState::new();
        let mut outcome = PipelineOutcome::default();
        let mut last_content_at = Instant::now();

        'read: while let Some(item) = upstream.recv().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(err) => {
                    let action = self
                        .recovery
                        .action_for(stream_error_kind(&err), state.error_count);
                    match self.apply_recovery(action, err, &mut state, &mut outcome) {
                        LineFlow::Continue => continue,
                        LineFlow::Stop => break,
                    }
                }
            };
            for line in reader.push_bytes(&bytes) {
                match self
                    .process_line(&line, &mut state, &mut outcome, &tx, &mut last_content_at)
                    .await
                {
                    LineFlow::Continue => {}
                    LineFlow::Stop => break 'read,
                }
            }
            if state.current == StreamPhase::Terminating {
                break;
            }
        }

        // Upstream ended without [DONE]: release anything still buffered.
        if state.current == StreamPhase::Stuttering
            && let Some(buffered) = state.buffer.take()
            && forward(&tx, &buffered, &mut outcome).await
        {
            debug!("flushed buffered chunk at stream end");
        }
        outcome
    }

    async fn process_line(
        &self,
        line: &str,
        state: &mut StreamState,
        outcome: &mut PipelineOutcome,
        tx: &Sender<Bytes>,
        last_content_at: &mut Instant,
    ) -> LineFlow {
        let chunk = ParsedChunk::parse(line);
        match chunk.kind {
            ChunkKind::Empty => LineFlow::Continue,
            ChunkKind::Unknown => {
                if tx
                    .send(Bytes::from(format!("{}\n", chunk.raw_line)))
                    .await
                    .is_err()
                {
                    outcome.error = Some(ProviderError::Canceled);
                    return LineFlow::Stop;
                }
                outcome.wrote_any = true;
                LineFlow::Continue
            }
            ChunkKind::Done => {
                if state.current == StreamPhase::Stuttering
                    && let Some(buffered) = state.buffer.take()
                    && !forward(tx, &buffered, outcome).await
                {
                    return LineFlow::Stop;
                }
                if tx.send(done_frame()).await.is_err() {
                    outcome.error = Some(ProviderError::Canceled);
                    return LineFlow::Stop;
                }
                outcome.wrote_any = true;
                state.transition(StreamPhase::Terminating, "done marker");
                LineFlow::Stop
            }
            // A decoded payload that is not a JSON object cannot be a delta
            // chunk; let the recovery manager decide (InvalidChunk→Continue).
            ChunkKind::Data if !chunk.is_object() => {
                let action = self
                    .recovery
                    .action_for(StreamErrorKind::InvalidChunk, state.error_count);
                self.apply_recovery(
                    action,
                    ProviderError::MalformedResponse(format!(
                        "non-object stream payload: {}",
                        chunk.content
                    )),
                    state,
                    outcome,
                )
            }
            ChunkKind::Data if !chunk.has_content => {
                state.note_valid_chunk();
                if !forward(tx, &chunk.raw_line, outcome).await {
                    return LineFlow::Stop;
                }
                LineFlow::Continue
            }
            ChunkKind::Data => {
                state.note_valid_chunk();
                let interval = last_content_at.elapsed();
                *last_content_at = Instant::now();
                self.handle_content(chunk, interval, state, outcome, tx).await
            }
            ChunkKind::Malformed => {
                let action = self
                    .recovery
                    .action_for(StreamErrorKind::MalformedJson, state.error_count);
                let detail = chunk
                    .error
                    .clone()
                    .unwrap_or_else(|| chunk.raw_line.clone());
                self.apply_recovery(
                    action,
                    ProviderError::MalformedResponse(detail),
                    state,
                    outcome,
                )
            }
        }
    }

    async fn handle_content(
        &self,
        chunk: ParsedChunk,
        interval: Duration,
        state: &mut StreamState,
        outcome: &mut PipelineOutcome,
        tx: &Sender<Bytes>,
    ) -> LineFlow {
        match state.current {
            StreamPhase::Initial => {
                state.buffer = Some(chunk.raw_line);
                state.transition(StreamPhase::Stuttering, "first content chunk buffered");
                LineFlow::Continue
            }
            StreamPhase::Stuttering => {
                let buffered_line = state.buffer.take().unwrap_or_default();
                let buffered_text = ParsedChunk::parse(&buffered_line)
                    .content_text
                    .unwrap_or_default();
                let current_text = chunk.content_text.as_deref().unwrap_or_default();
                if self
                    .detector
                    .is_stutter(&buffered_text, current_text, interval)
                {
                    debug!(
                        dropped = %buffered_text,
                        kept = %current_text,
                        "suppressed stuttering duplicate"
                    );
                    state.buffer = Some(chunk.raw_line);
                    LineFlow::Continue
                } else {
                    if !forward(tx, &buffered_line, outcome).await
                        || !forward(tx, &chunk.raw_line, outcome).await
                    {
                        return LineFlow::Stop;
                    }
                    state.transition(StreamPhase::NormalFlow, "non-prefix chunk; filter disarmed");
                    LineFlow::Continue
                }
            }
            StreamPhase::Recovering => {
                state.transition(StreamPhase::NormalFlow, "recovered on valid chunk");
                if !forward(tx, &chunk.raw_line, outcome).await {
                    return LineFlow::Stop;
                }
                LineFlow::Continue
            }
            StreamPhase::NormalFlow | StreamPhase::Terminating => {
                if !forward(tx, &chunk.raw_line, outcome).await {
                    return LineFlow::Stop;
                }
                LineFlow::Continue
            }
        }
    }

    fn apply_recovery(
        &self,
        action: RecoveryAction,
        error: ProviderError,
        state: &mut StreamState,
        outcome: &mut PipelineOutcome,
    ) -> LineFlow {
        state.error_count += 1;
        match action {
            RecoveryAction::Skip => {
                debug!(error = %error, "skipped bad chunk");
                LineFlow::Continue
            }
            RecoveryAction::Continue => LineFlow::Continue,
            RecoveryAction::Retry => {
                debug!(error = %error, "recoverable stream error");
                state.transition(StreamPhase::Recovering, "recoverable stream error");
                LineFlow::Continue
            }
            RecoveryAction::Terminate => {
                warn!(error = %error, "terminating stream on unrecoverable error");
                state.transition(StreamPhase::Terminating, "unrecoverable stream error");
                outcome.error = Some(error);
                LineFlow::Stop
            }
        }
    }
}

/// Upstream `Err` items mapped onto the recovery taxonomy.
fn stream_error_kind(err: &ProviderError) -> StreamErrorKind {
    match err {
        ProviderError::NetworkTimeout(_) => StreamErrorKind::NetworkTimeout,
        ProviderError::MalformedResponse(_) => StreamErrorKind::ParsingFailure,
        _ => StreamErrorKind::Unknown,
    }
}

enum LineFlow {
    Continue,
    Stop,
}

/// Whole-frame write: `line` already includes its `data: ` prefix. A failed
/// send means the client receiver is gone.
async fn forward(tx: &Sender<Bytes>, line: &str, outcome: &mut PipelineOutcome) -> bool {
    if tx.send(Bytes::from(format!("{line}\n\n"))).await.is_err() {
        outcome.error = Some(ProviderError::Canceled);
        return false;
    }
    outcome.forwarded += 1;
    outcome.wrote_any = true;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_provider_core::ProviderResult;

    async fn run_items(items: Vec<ProviderResult<&str>>) -> (Vec<String>, PipelineOutcome) {
        let (up_tx, up_rx) = tokio::sync::mpsc::channel::<ProviderResult<Bytes>>(32);
        for item in items {
            up_tx
                .send(item.map(|frame| Bytes::from(format!("{frame}\n"))))
                .await
                .expect("send upstream");
        }
        drop(up_tx);

        let (down_tx, mut down_rx) = tokio::sync::mpsc::channel::<Bytes>(32);
        let pipeline = StreamPipeline::new(PipelineConfig::default());
        let outcome = pipeline.run(up_rx, down_tx).await;

        let mut received = Vec::new();
        while let Some(chunk) = down_rx.recv().await {
            received.push(String::from_utf8_lossy(&chunk).into_owned());
        }
        (received, outcome)
    }

    async fn run_pipeline(frames: &[&str]) -> (Vec<String>, PipelineOutcome) {
        run_items(frames.iter().map(|frame| Ok(*frame)).collect()).await
    }

    #[tokio::test]
    async fn stuttering_prefix_duplicate_is_suppressed() {
        let (received, outcome) = run_pipeline(&[
            r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":" world"}}]}"#,
            "data: [DONE]",
        ])
        .await;

        assert_eq!(
            received,
            vec![
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n".to_string(),
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n".to_string(),
                "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n".to_string(),
                "data: [DONE]\n\n".to_string(),
            ]
        );
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn non_prefix_chunks_both_pass_and_disarm_the_filter() {
        let (received, _) = run_pipeline(&[
            r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":" there"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
            "data: [DONE]",
        ])
        .await;
        // " there" is not a prefix partner of "Hi": both forwarded, and the
        // later "Hi" repeat is left alone.
        assert_eq!(received.len(), 4);
        assert!(received[0].contains("\"Hi\""));
        assert!(received[1].contains("\" there\""));
        assert!(received[2].contains("\"Hi\""));
    }

    #[tokio::test]
    async fn lone_buffered_chunk_is_flushed_on_done() {
        let (received, _) = run_pipeline(&[
            r#"data: {"choices":[{"delta":{"content":"only"}}]}"#,
            "data: [DONE]",
        ])
        .await;
        assert_eq!(received.len(), 2);
        assert!(received[0].contains("\"only\""));
        assert_eq!(received[1], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn buffered_chunk_is_flushed_at_eof_without_done() {
        let (received, _) =
            run_pipeline(&[r#"data: {"choices":[{"delta":{"content":"tail"}}]}"#]).await;
        assert_eq!(received.len(), 1);
        assert!(received[0].contains("\"tail\""));
    }

    #[tokio::test]
    async fn malformed_chunks_are_skipped_not_fatal() {
        let (received, outcome) = run_pipeline(&[
            r#"data: {"choices":[{"delta":{"content":"a"}}]}"#,
            "data: {broken",
            r#"data: {"choices":[{"delta":{"content":"ab"}}]}"#,
            "data: [DONE]",
        ])
        .await;
        // "a" buffered, broken skipped, "ab" replaces it (prefix), flushed at DONE.
        assert_eq!(received.len(), 2);
        assert!(received[0].contains("\"ab\""));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn non_object_payloads_are_dropped_as_invalid_chunks() {
        let (received, outcome) = run_pipeline(&[
            r#"data: [1,2,3]"#,
            r#"data: {"choices":[{"delta":{"content":"ok"}}]}"#,
            "data: [DONE]",
        ])
        .await;
        assert_eq!(received.len(), 2);
        assert!(received[0].contains("\"ok\""));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn upstream_timeout_enters_recovery_and_resumes_on_valid_data() {
        let (received, outcome) = run_items(vec![
            Ok(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            Ok(r#"data: {"choices":[{"delta":{"content":" all"}}]}"#),
            Err(ProviderError::NetworkTimeout("idle".to_string())),
            Ok(r#"data: {"choices":[{"delta":{"content":" again"}}]}"#),
            Ok("data: [DONE]"),
        ])
        .await;
        // Two chunks disarm the filter; the timeout parks the stream in
        // recovery; the next valid chunk resumes normal flow.
        assert_eq!(received.len(), 4);
        assert!(received[2].contains("\" again\""));
        assert_eq!(received[3], "data: [DONE]\n\n");
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn repeated_timeouts_exhaust_the_budget_and_terminate() {
        let (received, outcome) = run_items(vec![
            Err(ProviderError::NetworkTimeout("idle 1".to_string())),
            Err(ProviderError::NetworkTimeout("idle 2".to_string())),
            Err(ProviderError::NetworkTimeout("idle 3".to_string())),
            Err(ProviderError::NetworkTimeout("idle 4".to_string())),
            Ok("data: [DONE]"),
        ])
        .await;
        assert!(received.is_empty());
        assert!(matches!(
            outcome.error,
            Some(ProviderError::NetworkTimeout(_))
        ));
    }

    #[tokio::test]
    async fn unknown_upstream_errors_terminate_immediately() {
        let (received, outcome) = run_items(vec![
            Err(ProviderError::Network("connection reset".to_string())),
            Ok("data: [DONE]"),
        ])
        .await;
        assert!(received.is_empty());
        assert!(matches!(outcome.error, Some(ProviderError::Network(_))));
    }

    #[tokio::test]
    async fn parsing_failures_from_the_adapter_are_skipped() {
        let (received, outcome) = run_items(vec![
            Err(ProviderError::MalformedResponse("bad event".to_string())),
            Ok(r#"data: {"choices":[{"delta":{"content":"ok"}}]}"#),
            Ok("data: [DONE]"),
        ])
        .await;
        assert_eq!(received.len(), 2);
        assert!(received[0].contains("\"ok\""));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn dropped_client_is_recorded_as_canceled() {
        let (up_tx, up_rx) = tokio::sync::mpsc::channel::<ProviderResult<Bytes>>(8);
        // Two non-prefix chunks so the second one must actually be written.
        for frame in [
            r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":" all"}}]}"#,
        ] {
            up_tx
                .send(Ok(Bytes::from(format!("{frame}\n"))))
                .await
                .expect("send upstream");
        }
        drop(up_tx);

        let (down_tx, down_rx) = tokio::sync::mpsc::channel::<Bytes>(1);
        drop(down_rx);
        let pipeline = StreamPipeline::new(PipelineConfig::default());
        let outcome = pipeline.run(up_rx, down_tx).await;
        assert!(outcome.client_canceled());
        assert!(!outcome.wrote_any);
    }

    #[tokio::test]
    async fn non_data_lines_are_forwarded_verbatim() {
        let (received, _) = run_pipeline(&[": keep-alive", "data: [DONE]"]).await;
        assert_eq!(received[0], ": keep-alive\n");
        assert_eq!(received[1], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn concatenated_content_matches_upstream_minus_one_duplicate() {
        let frames = [
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":" wor"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"ld"}}]}"#,
            "data: [DONE]",
        ];
        let (received, _) = run_pipeline(&frames).await;
        let text: String = received
            .iter()
            .filter_map(|frame| {
                let chunk = ParsedChunk::parse(frame.trim_end());
                chunk.content_text
            })
            .collect();
        assert_eq!(text, "Hello world");
    }
}
