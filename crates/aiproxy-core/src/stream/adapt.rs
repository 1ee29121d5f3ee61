use bytes::Bytes;

use aiproxy_protocol::Proto;
use aiproxy_protocol::claude::MessagesStreamEvent;
use aiproxy_protocol::sse::{DATA_PREFIX, DONE_PAYLOAD, SseLineReader, data_frame, done_frame};
use aiproxy_provider_core::{ByteStream, ProviderError, ProviderResult};
use aiproxy_transform::{NativeStreamEvent, converter_for};

/// Normalize a provider's native stream into OpenAI-dialect SSE.
///
/// OpenAI-dialect upstreams pass through untouched. Claude and Gemini
/// upstreams have each `data:` event converted to an OpenAI chunk line, and
/// the stream is closed with `data: [DONE]` (their dialects have no such
/// marker of their own). Upstream `Err` items and per-line decode failures
/// are forwarded as `Err` items for the pipeline's recovery manager.
pub fn adapt_native_stream(proto: Proto, upstream: ByteStream, model: &str) -> ByteStream {
    match proto {
        Proto::OpenAI | Proto::Qwen => upstream,
        Proto::Claude | Proto::Gemini => convert_stream(proto, upstream, model),
    }
}

fn convert_stream(proto: Proto, mut upstream: ByteStream, model: &str) -> ByteStream {
    let model = model.to_string();
    let (tx, rx) = tokio::sync::mpsc::channel::<ProviderResult<Bytes>>(16);

    tokio::spawn(async move {
        let converter = converter_for(proto);
        let mut reader = SseLineReader::new();
        let mut clean = true;
        'outer: while let Some(item) = upstream.recv().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    // Transport-level failure; the producer has stopped.
                    clean = false;
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            };
            for line in reader.push_bytes(&chunk) {
                let frame = match convert_line(proto, converter, &line, &model) {
                    Ok(Some(frame)) => Ok(frame),
                    Ok(None) => continue,
                    Err(err) => Err(err),
                };
                if tx.send(frame).await.is_err() {
                    break 'outer;
                }
            }
        }
        if clean {
            let _ = tx.send(Ok(done_frame())).await;
        }
    });

    rx
}

fn convert_line(
    proto: Proto,
    converter: &dyn aiproxy_transform::Converter,
    line: &str,
    model: &str,
) -> ProviderResult<Option<Bytes>> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == DONE_PAYLOAD {
        return Ok(None);
    }
    let event = match proto {
        Proto::Claude => {
            let event: MessagesStreamEvent = serde_json::from_str(payload)
                .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
            NativeStreamEvent::Claude(event)
        }
        Proto::Gemini => {
            let value: serde_json::Value = serde_json::from_str(payload)
                .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
            NativeStreamEvent::Gemini(value)
        }
        _ => return Ok(None),
    };
    let chunk = converter
        .to_openai_stream_chunk(event, model)
        .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
    let Some(chunk) = chunk else {
        return Ok(None);
    };
    let encoded = serde_json::to_string(&chunk)
        .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
    Ok(Some(data_frame(&encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: ByteStream) -> Vec<ProviderResult<String>> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item.map(|chunk| String::from_utf8_lossy(&chunk).into_owned()));
        }
        items
    }

    #[tokio::test]
    async fn claude_events_become_openai_chunks_with_a_done_marker() {
        let (tx, rx) = tokio::sync::mpsc::channel::<ProviderResult<Bytes>>(8);
        tx.send(Ok(Bytes::from(
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
        )))
        .await
        .expect("send");
        drop(tx);

        let items = collect(adapt_native_stream(Proto::Claude, rx, "claude-sonnet-4-5")).await;
        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().expect("converted frame");
        assert!(first.contains("\"content\":\"Hello\""));
        assert!(first.starts_with("data: "));
        assert_eq!(items[1].as_deref(), Ok("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn undecodable_data_lines_surface_as_errors_not_silence() {
        let (tx, rx) = tokio::sync::mpsc::channel::<ProviderResult<Bytes>>(8);
        tx.send(Ok(Bytes::from_static(b"data: {not json\n\n")))
            .await
            .expect("send");
        drop(tx);

        let items = collect(adapt_native_stream(Proto::Claude, rx, "m")).await;
        assert!(matches!(
            items[0],
            Err(ProviderError::MalformedResponse(_))
        ));
        // A bad line is not fatal; the stream still ends cleanly.
        assert_eq!(items[1].as_deref(), Ok("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn transport_errors_pass_through_without_a_done_marker() {
        let (tx, rx) = tokio::sync::mpsc::channel::<ProviderResult<Bytes>>(8);
        tx.send(Err(ProviderError::NetworkTimeout("idle".to_string())))
            .await
            .expect("send");
        drop(tx);

        let items = collect(adapt_native_stream(Proto::Gemini, rx, "m")).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ProviderError::NetworkTimeout(_))));
    }

    #[tokio::test]
    async fn openai_streams_pass_through_untouched() {
        let (tx, rx) = tokio::sync::mpsc::channel::<ProviderResult<Bytes>>(8);
        tx.send(Ok(Bytes::from_static(b"data: {\"x\":1}\n\n")))
            .await
            .expect("send");
        drop(tx);
        let items = collect(adapt_native_stream(Proto::OpenAI, rx, "m")).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_deref(), Ok("data: {\"x\":1}\n\n"));
    }
}
