use bytes::Bytes;

pub const DONE_PAYLOAD: &str = "[DONE]";
pub const DATA_PREFIX: &str = "data: ";

/// A complete `data: …\n\n` frame for one payload.
pub fn data_frame(payload: &str) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

pub fn done_frame() -> Bytes {
    data_frame(DONE_PAYLOAD)
}

/// Splits an SSE byte stream into lines. Carriage returns are stripped and
/// partial lines are buffered until the next chunk completes them.
#[derive(Debug, Default)]
pub struct SseLineReader {
    buffer: Vec<u8>,
}

impl SseLineReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        lines
    }

    /// Flush whatever is buffered once the upstream body ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks_are_reassembled() {
        let mut reader = SseLineReader::new();
        let first = reader.push_bytes(&Bytes::from_static(b"data: {\"a\":"));
        assert!(first.is_empty());
        let second = reader.push_bytes(&Bytes::from_static(b"1}\n\ndata: [DONE]\n"));
        assert_eq!(second, vec!["data: {\"a\":1}", "", "data: [DONE]"]);
    }

    #[test]
    fn crlf_is_stripped() {
        let mut reader = SseLineReader::new();
        let lines = reader.push_bytes(&Bytes::from_static(b"data: x\r\n"));
        assert_eq!(lines, vec!["data: x"]);
    }

    #[test]
    fn finish_returns_the_trailing_partial_line() {
        let mut reader = SseLineReader::new();
        reader.push_bytes(&Bytes::from_static(b"data: tail"));
        assert_eq!(reader.finish().as_deref(), Some("data: tail"));
        assert_eq!(reader.finish(), None);
    }

    #[test]
    fn data_frame_is_a_complete_sse_unit() {
        assert_eq!(&data_frame("{}")[..], b"data: {}\n\n");
        assert_eq!(&done_frame()[..], b"data: [DONE]\n\n");
    }
}
