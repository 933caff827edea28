//! SSE (Server-Sent Events) decoding utilities
//!
//! Turns the raw byte chunks of a streamed chat completion into typed
//! frames. Chunk boundaries carry no meaning: a `data:` line may be split
//! across any number of reads and is only decoded once its terminator has
//! arrived.

use bytes::Bytes;
use thiserror::Error;

use crate::completion::StreamChunk;

/// Field prefix of an SSE data line
pub const DATA_PREFIX: &str = "data:";

/// Payload that marks the end of an OpenAI-style stream
pub const DONE_MARKER: &str = "[DONE]";

/// Longest line kept while waiting for its terminator
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Buffer for accumulating incomplete SSE lines across chunk boundaries.
///
/// Bytes are kept undecoded until a full line is available, so a multi-byte
/// UTF-8 sequence split between two chunks is decoded intact.
///
/// # Example
/// ```
/// use threatlens::streaming::SseLineBuffer;
///
/// let mut buffer = SseLineBuffer::new();
///
/// // First chunk contains partial line
/// let lines1 = buffer.feed(b"data: {\"content\":\"hel");
/// assert!(lines1.is_empty()); // No complete lines yet
///
/// // Second chunk completes the line
/// let lines2 = buffer.feed(b"lo\"}\n");
/// assert_eq!(lines2, vec!["data: {\"content\":\"hello\"}"]);
/// ```
#[derive(Debug)]
pub struct SseLineBuffer {
    /// Bytes of the trailing line that has no terminator yet
    incomplete: Vec<u8>,
    max_line_len: usize,
    /// Set while skipping the rest of an oversized line
    discarding: bool,
    /// Oversized lines dropped since the last `take_overflows`
    overflows: usize,
}

impl Default for SseLineBuffer {
    fn default() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_BYTES)
    }
}

impl SseLineBuffer {
    /// Create a new empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer that drops lines longer than `max_line_len` bytes
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            incomplete: Vec::new(),
            max_line_len,
            discarding: false,
            overflows: 0,
        }
    }

    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    /// Feed bytes into the buffer and return any complete lines.
    ///
    /// Lines end with `\n`; a preceding `\r` is stripped as well. Blank lines
    /// (SSE event separators) are not returned. Trailing data without a
    /// terminator is retained for the next call. A line that grows past the
    /// length limit is dropped whole and counted in `take_overflows`.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut complete_lines = Vec::new();
        let mut rest = bytes;

        while let Some(end) = rest.iter().position(|b| *b == b'\n') {
            if self.discarding {
                self.discarding = false;
            } else {
                self.incomplete.extend_from_slice(&rest[..end]);
                if self.incomplete.len() > self.max_line_len {
                    self.overflows += 1;
                } else if let Some(line) = decode_line(&self.incomplete) {
                    complete_lines.push(line);
                }
                self.incomplete.clear();
            }
            rest = &rest[end + 1..];
        }

        if !self.discarding {
            self.incomplete.extend_from_slice(rest);
            if self.incomplete.len() > self.max_line_len {
                self.incomplete = Vec::new();
                self.discarding = true;
                self.overflows += 1;
            }
        }

        complete_lines
    }

    /// Take the unterminated trailing line, if any.
    ///
    /// Call this once the stream has ended: a server is allowed to close the
    /// connection right after the last line without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        self.discarding = false;
        let rest = std::mem::take(&mut self.incomplete);
        decode_line(&rest)
    }

    /// Number of oversized lines dropped since the last call
    pub fn take_overflows(&mut self) -> usize {
        std::mem::take(&mut self.overflows)
    }

    /// Check if there's any incomplete data remaining in the buffer.
    pub fn has_incomplete(&self) -> bool {
        !self.incomplete.is_empty()
    }

    /// Get any remaining incomplete data, lossily decoded.
    pub fn remaining(&self) -> String {
        String::from_utf8_lossy(&self.incomplete).into_owned()
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(raw).into_owned())
}

/// One decoded SSE line
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A `data:` line carrying a completion chunk
    Data(StreamChunk),
    /// The `data: [DONE]` terminator
    Done,
    /// Any other line (comments, `event:`/`id:` fields)
    Ignored,
}

/// A frame that could not be decoded and was skipped
#[derive(Debug, Error)]
pub enum FrameError {
    /// A `data:` line whose payload is not a valid completion chunk
    #[error("Malformed SSE frame: {source}")]
    Malformed {
        /// The offending line, verbatim
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// A line that exceeded the length limit before its terminator arrived
    #[error("SSE line longer than {limit} bytes")]
    Oversized { limit: usize },
}

impl FrameError {
    /// The offending line, when it was kept
    pub fn line(&self) -> Option<&str> {
        match self {
            FrameError::Malformed { line, .. } => Some(line),
            FrameError::Oversized { .. } => None,
        }
    }
}

/// Parse a single complete SSE line.
pub fn parse_line(line: &str) -> Result<SseFrame, FrameError> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(SseFrame::Ignored);
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_MARKER {
        return Ok(SseFrame::Done);
    }

    serde_json::from_str(payload)
        .map(SseFrame::Data)
        .map_err(|source| FrameError::Malformed {
            line: line.to_string(),
            source,
        })
}

/// Incremental SSE decoder: line framing plus frame parsing.
#[derive(Debug, Default)]
pub struct SseDecoder {
    lines: SseLineBuffer,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder that skips lines longer than `max_line_len` bytes
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            lines: SseLineBuffer::with_max_line_len(max_line_len),
        }
    }

    /// Decode every frame completed by this chunk, in arrival order.
    ///
    /// Oversized lines dropped during this chunk are reported after the
    /// decoded frames.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Result<SseFrame, FrameError>> {
        let mut frames: Vec<_> = self
            .lines
            .feed(bytes)
            .iter()
            .map(|line| parse_line(line))
            .collect();

        let limit = self.lines.max_line_len();
        let overflows = self.lines.take_overflows();
        frames.extend((0..overflows).map(|_| Err(FrameError::Oversized { limit })));
        frames
    }

    /// Decode the unterminated trailing line left at end of stream.
    pub fn finish(&mut self) -> Option<Result<SseFrame, FrameError>> {
        self.lines.finish().map(|line| parse_line(&line))
    }
}

/// Format a stream chunk as an SSE data event: `data: {json}\n\n`
pub fn format_sse_chunk(chunk: &StreamChunk) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(chunk)?;
    Ok(Bytes::from(format!("data: {}\n\n", json)))
}

/// Format the SSE done marker: `data: [DONE]\n\n`
pub fn format_sse_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}
