//! Server-sent-event framing.
//!
//! Only `data:` fields matter to the providers we talk to; `event:`, `id:`,
//! `retry:` and comment lines are skipped.

use futures_util::{Stream, StreamExt};
use memchr::memchr;

use crate::core::providers::ProviderKind;
use crate::providers::error::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    /// The OpenAI-style `data: [DONE]` sentinel.
    Done,
}

/// Splits a byte stream into SSE frames, holding any partial trailing line
/// until the next chunk arrives.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            if let Some(frame) = parse_line(&self.buffer[..newline_pos]) {
                frames.push(frame);
            }
            self.buffer.drain(..=newline_pos);
        }
        frames
    }

    /// Parse whatever is left once the byte stream ends.
    pub fn flush(&mut self) -> Option<SseFrame> {
        let remaining = std::mem::take(&mut self.buffer);
        parse_line(&remaining)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseFrame> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(err) => {
            tracing::warn!(error = %err, "skipping SSE line with invalid UTF-8");
            return None;
        }
    };
    let payload = line.strip_prefix("data:")?.trim_start();
    match payload {
        "" => None,
        "[DONE]" => Some(SseFrame::Done),
        data => Some(SseFrame::Data(data.to_string())),
    }
}

/// Turn a streaming HTTP response into SSE frames. Read errors end the stream
/// with a transport error.
pub fn frames(
    provider: ProviderKind,
    response: reqwest::Response,
) -> impl Stream<Item = Result<SseFrame, ProviderError>> + Send {
    async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for frame in buffer.feed(&chunk) {
                        yield Ok(frame);
                    }
                }
                Err(err) => {
                    yield Err(ProviderError::from_reqwest(provider, &err));
                    return;
                }
            }
        }
        if let Some(frame) = buffer.flush() {
            yield Ok(frame);
        }
    }
}
