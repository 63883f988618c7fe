//! Incremental decoding of streaming HTTP response bodies.
//!
//! Two wire shapes are covered: Server-Sent Events (`data: {...}` lines,
//! terminated by a `[DONE]` marker) and newline-delimited JSON. Both are
//! decoded line by line as bytes arrive, so a JSON document split across
//! two network reads is reassembled before it is surfaced.

use futures::stream::{self, Stream, StreamExt};
use std::future::ready;

use crate::error::InferenceError;

/// Reassembles complete lines from raw transport reads.
///
/// Bytes are buffered until a newline, and only complete lines are decoded
/// as UTF-8. A multi-byte character split across two reads therefore stays
/// intact; converting each read on its own would mangle it.
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Next complete line, trimmed. May be empty; the caller skips those.
    fn next_line(&mut self) -> Option<String> {
        let pos = self.bytes.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line[..pos]).trim().to_string())
    }

    /// Trailing line without a terminator, flushed when the body ends.
    fn flush(&mut self) -> Option<String> {
        if self.bytes.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.bytes).trim().to_string();
        self.bytes.clear();
        (!line.is_empty()).then_some(line)
    }
}

/// Decode a response body into complete, non-empty, trimmed lines.
fn decode_lines(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, InferenceError>> + Send {
    let byte_stream = response.bytes_stream();

    stream::unfold(
        (Box::pin(byte_stream), LineBuffer::default(), false),
        |(mut byte_stream, mut buffer, mut ended)| async move {
            loop {
                while let Some(line) = buffer.next_line() {
                    if line.is_empty() {
                        continue;
                    }
                    return Some((Ok(line), (byte_stream, buffer, ended)));
                }

                if ended {
                    return buffer
                        .flush()
                        .map(|line| (Ok(line), (byte_stream, buffer, ended)));
                }

                match byte_stream.next().await {
                    Some(Ok(chunk)) => buffer.extend(&chunk),
                    Some(Err(e)) => {
                        return Some((
                            Err(InferenceError::from(e)),
                            (byte_stream, buffer, ended),
                        ));
                    }
                    None => ended = true,
                }
            }
        },
    )
}

/// Extension trait for `reqwest::Response` enabling streaming decodes.
pub trait StreamingResponseExt {
    /// Stream of SSE data payloads, ending at the `[DONE]` marker.
    fn sse(self) -> impl Stream<Item = Result<String, InferenceError>> + Send;

    /// Stream of newline-delimited JSON documents, one per line.
    fn ndjson(self) -> impl Stream<Item = Result<String, InferenceError>> + Send;
}

impl StreamingResponseExt for reqwest::Response {
    fn sse(self) -> impl Stream<Item = Result<String, InferenceError>> + Send {
        decode_lines(self)
            .filter_map(|result| {
                ready(match result {
                    Ok(line) => parse_sse_line(&line).map(|data| Ok(data.to_string())),
                    Err(e) => Some(Err(e)),
                })
            })
            .take_while(|result| ready(!matches!(result, Ok(data) if is_done_marker(data))))
    }

    fn ndjson(self) -> impl Stream<Item = Result<String, InferenceError>> + Send {
        decode_lines(self)
    }
}

/// Extract the data portion of an SSE line (`data: <content>`).
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Whether an SSE data payload is the end-of-stream marker.
pub fn is_done_marker(data: &str) -> bool {
    data == "[DONE]"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_lines() {
        assert_eq!(parse_sse_line("data: {\"a\": 1}"), Some("{\"a\": 1}"));
        assert_eq!(parse_sse_line("data:   padded  "), Some("padded"));
        assert_eq!(parse_sse_line("data:[DONE]"), Some("[DONE]"));
        assert_eq!(parse_sse_line("event: ping"), None);
        assert_eq!(parse_sse_line(""), None);
    }

    #[test]
    fn recognizes_done_marker() {
        assert!(is_done_marker("[DONE]"));
        assert!(!is_done_marker("[done]"));
        assert!(!is_done_marker("{\"choices\": []}"));
    }

    #[test]
    fn reassembles_lines_across_reads() {
        let mut buffer = LineBuffer::default();
        buffer.extend(b"data: {\"a\":");
        assert_eq!(buffer.next_line(), None);
        buffer.extend(b" 1}\ndata: ");
        assert_eq!(buffer.next_line().as_deref(), Some("data: {\"a\": 1}"));
        assert_eq!(buffer.next_line(), None);
        buffer.extend(b"[DONE]\n");
        assert_eq!(buffer.next_line().as_deref(), Some("data: [DONE]"));
    }

    #[test]
    fn multibyte_character_split_across_reads_survives() {
        let payload = "{\"response\":\"caf\u{e9} \u{1f600}\"}\n".as_bytes();
        for split in 1..payload.len() {
            let mut buffer = LineBuffer::default();
            buffer.extend(&payload[..split]);
            let early = buffer.next_line();
            buffer.extend(&payload[split..]);
            let line = early.or_else(|| buffer.next_line()).unwrap();
            assert_eq!(
                line,
                "{\"response\":\"caf\u{e9} \u{1f600}\"}",
                "split at {split}"
            );
        }
    }

    #[test]
    fn trailing_line_without_newline_is_flushed_whole() {
        let mut buffer = LineBuffer::default();
        buffer.extend(b"data: caf");
        buffer.extend(&[0xC3]);
        assert_eq!(buffer.next_line(), None);
        buffer.extend(&[0xA9]);
        assert_eq!(buffer.flush().as_deref(), Some("data: caf\u{e9}"));
        assert_eq!(buffer.flush(), None);
    }
}
