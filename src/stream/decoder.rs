//! Incremental line decoder for the chat event stream
//!
//! Bytes arrive in arbitrary chunks. A chunk may end in the middle of a line,
//! in the middle of a JSON object, or even in the middle of a multi-byte UTF-8
//! character. [`LineDecoder`] keeps the unconsumed tail and only ever yields
//! complete `\n`-terminated lines (with one trailing `\r` stripped).
//!
//! Splitting happens on raw bytes before text decoding. `\n` never occurs
//! inside a multi-byte UTF-8 sequence, so a completed line always holds whole
//! characters regardless of how the transport chunked it.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use futures::{Stream, StreamExt};

use super::ByteStream;

/// Owned byte buffer plus a scan cursor.
///
/// # Examples
///
/// ```
/// use streamchat::stream::decoder::LineDecoder;
///
/// let mut decoder = LineDecoder::new();
/// assert!(decoder.push(b"data: he").is_empty());
/// assert_eq!(decoder.push(b"llo\r\nda"), vec!["data: hello".to_string()]);
/// assert_eq!(decoder.pending_len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known to contain no `\n`.
    scanned: usize,
}

impl LineDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
        {
            let end = self.scanned + offset;
            let mut raw = self.buffer.split_to(end + 1);
            raw.truncate(end);
            if raw.last() == Some(&b'\r') {
                raw.truncate(end - 1);
            }
            lines.push(String::from_utf8_lossy(raw.chunk()).into_owned());
            self.scanned = 0;
        }
        self.scanned = self.buffer.len();

        lines
    }

    /// Number of buffered bytes not yet emitted as a line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop the unterminated tail at end of stream, returning its size.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.scanned = 0;
        dropped
    }
}

struct DecodeState {
    body: ByteStream,
    decoder: LineDecoder,
    ready: VecDeque<String>,
    finished: bool,
}

/// Lazily decode a response body into complete lines.
///
/// The returned stream ends when the body ends; any unterminated trailing
/// bytes are discarded. A transport error is yielded once and then the
/// stream ends.
pub fn decode_lines(body: ByteStream) -> impl Stream<Item = std::io::Result<String>> + Send {
    let state = DecodeState {
        body,
        decoder: LineDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.ready.extend(state.decoder.push(&chunk));
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    let dropped = state.decoder.finish();
                    if dropped > 0 {
                        tracing::debug!(bytes = dropped, "Discarding unterminated trailing line");
                    }
                }
            }
        }
    })
}
