//! Event-stream decoding.
//!
//! Completions arrive as line-delimited events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hi"}}]}
//!
//! data: [DONE]
//! ```
//!
//! [`decode_lines`] turns arbitrary byte chunks into complete event lines and
//! [`extract_payloads`] strips the `data: ` marker. Parsing the payload JSON is
//! left to the caller.

use chatrelay_common::Result;
use futures::{Stream, StreamExt};
use memchr::memchr;
use tracing::debug;

/// Marker carried by every event line
pub const EVENT_PREFIX: &str = "data: ";
/// Line that ends the stream
pub const DONE_SENTINEL: &str = "data: [DONE]";

/// Whether a trimmed line carries an event payload
pub fn is_event_line(line: &str) -> bool {
    line.starts_with(EVENT_PREFIX)
}

/// Incremental line splitter with one carry-over buffer
///
/// Lines are cut on raw bytes and only then decoded, so a multi-byte
/// character split across two chunks still decodes correctly.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Ignored once the sentinel has been seen.
    pub fn push(&mut self, chunk: &[u8]) {
        if !self.done {
            self.buffer.extend_from_slice(chunk);
        }
    }

    /// Next complete event line with trailing whitespace removed.
    ///
    /// Returns `None` when more input is needed or the stream is finished.
    /// Lines without the event marker are skipped.
    pub fn next_line(&mut self) -> Option<String> {
        while !self.done {
            let end = memchr(b'\n', &self.buffer)?;
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();

            if line == DONE_SENTINEL {
                self.done = true;
                self.buffer.clear();
                return None;
            }
            if is_event_line(&line) {
                return Some(line);
            }
        }
        None
    }

    /// True once the sentinel line has been consumed
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes of an unterminated trailing line
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }
}

/// Decode a chunk stream into event lines.
///
/// Ends at the sentinel or when `chunks` ends. An error from `chunks` is
/// passed through once and ends the sequence.
pub fn decode_lines<S, B>(chunks: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<B>> + Send,
    B: AsRef<[u8]> + Send,
{
    async_stream::stream! {
        let mut decoder = FrameDecoder::new();
        let mut chunks = Box::pin(chunks);

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    decoder.push(bytes.as_ref());
                    while let Some(line) = decoder.next_line() {
                        yield Ok(line);
                    }
                    if decoder.is_done() {
                        return;
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if !decoder.remainder().is_empty() {
            debug!(
                "Dropping {} bytes of unterminated trailing line",
                decoder.remainder().len()
            );
        }
    }
}

/// Text after the event marker
pub fn extract_payload(line: &str) -> &str {
    line.strip_prefix(EVENT_PREFIX).unwrap_or(line)
}

/// Strip the event marker from each line
pub fn extract_payloads<S>(lines: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<String>> + Send,
{
    lines.map(|line| line.map(|line| extract_payload(&line).to_string()))
}

/// Bytes to payload strings in one step
pub fn event_payloads<S, B>(chunks: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<B>> + Send,
    B: AsRef<[u8]> + Send,
{
    extract_payloads(decode_lines(chunks))
}
