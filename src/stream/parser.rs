//! Delta event parsing for decoded stream lines
//!
//! [`classify_line`] looks at one line in isolation. [`DeltaAssembler`] wraps
//! it with the re-merge rule: a data line whose JSON does not parse is held
//! back and joined with the following line(s) until it parses, up to a
//! bounded number of attempts, after which it is dropped with a warning.

use serde_json::Value;

/// Prefix carried by every payload line.
pub const DATA_PREFIX: &str = "data:";

/// Payload that terminates the stream.
pub const DONE_TOKEN: &str = "[DONE]";

/// JSON pointer to the incremental content fragment.
const CONTENT_POINTER: &str = "/choices/0/delta/content";

/// Classification of a single decoded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// Blank line, `:` comment/keepalive, or a non-data field
    Skip,
    /// `data: [DONE]`
    Done,
    /// Parsed payload, with its content fragment if it carried one
    Payload(Option<String>),
    /// The payload is not valid JSON yet; holds the payload text
    Incomplete(String),
}

/// What the caller should do after feeding one line to [`DeltaAssembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// Append this fragment to the reply
    Fragment(String),
    /// The stream is complete
    Done,
    /// Nothing to do for this line
    Nothing,
}

/// Classify one decoded line.
///
/// # Examples
///
/// ```
/// use streamchat::stream::parser::{classify_line, LineKind};
///
/// assert_eq!(classify_line(": keepalive"), LineKind::Skip);
/// assert_eq!(classify_line("data: [DONE]"), LineKind::Done);
/// assert_eq!(
///     classify_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
///     LineKind::Payload(Some("Hi".to_string()))
/// );
/// ```
pub fn classify_line(line: &str) -> LineKind {
    if line.trim().is_empty() || line.starts_with(':') {
        return LineKind::Skip;
    }

    let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
        return LineKind::Skip;
    };

    let payload = rest.trim();
    if payload == DONE_TOKEN {
        return LineKind::Done;
    }

    match extract_fragment(payload) {
        Ok(fragment) => LineKind::Payload(fragment),
        Err(_) => LineKind::Incomplete(payload.to_string()),
    }
}

/// Parse a JSON payload and pull out its non-empty content fragment.
fn extract_fragment(payload: &str) -> serde_json::Result<Option<String>> {
    let value: Value = serde_json::from_str(payload)?;
    Ok(value
        .pointer(CONTENT_POINTER)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

/// Stateful line consumer implementing bounded re-merge of split payloads.
///
/// A `data:` payload that is not valid JSON is held back and prefixed to the
/// following lines until the combination parses. It is dropped with a `warn`
/// log in two cases:
///
/// - `max_attempts` follow-up lines were merged and it still does not parse;
/// - the next line starts a new event (`data:`) or is a comment (`:`). That
///   line cannot be a continuation, so the held payload is dropped at once
///   without spending the remaining attempts, and the new line is processed
///   normally. A `data: [DONE]` arriving this way still ends the stream.
///
/// Blank lines neither merge nor count as an attempt.
#[derive(Debug)]
pub struct DeltaAssembler {
    pending: Option<String>,
    attempts: usize,
    max_attempts: usize,
}

impl DeltaAssembler {
    /// Create an assembler that gives an unparsable payload at most
    /// `max_attempts` follow-up lines before dropping it.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            pending: None,
            attempts: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Returns true while a partial payload is held back.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one decoded line.
    pub fn feed(&mut self, line: &str) -> ParsedLine {
        if let Some(pending) = self.pending.take() {
            return self.merge(pending, line);
        }

        match classify_line(line) {
            LineKind::Skip => ParsedLine::Nothing,
            LineKind::Done => ParsedLine::Done,
            LineKind::Payload(fragment) => fragment.map_or(ParsedLine::Nothing, ParsedLine::Fragment),
            LineKind::Incomplete(payload) => {
                tracing::trace!(len = payload.len(), "Holding back unparsable payload");
                self.pending = Some(payload);
                self.attempts = 0;
                ParsedLine::Nothing
            }
        }
    }

    fn merge(&mut self, pending: String, line: &str) -> ParsedLine {
        if line.trim().is_empty() {
            self.pending = Some(pending);
            return ParsedLine::Nothing;
        }

        let combined = format!("{}{}", pending, line);
        if let Ok(fragment) = extract_fragment(&combined) {
            self.attempts = 0;
            return fragment.map_or(ParsedLine::Nothing, ParsedLine::Fragment);
        }

        if line.starts_with(DATA_PREFIX) || line.starts_with(':') {
            tracing::warn!(
                len = pending.len(),
                "Dropping unparsable payload superseded by a new event line"
            );
            self.attempts = 0;
            return self.feed(line);
        }

        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            tracing::warn!(
                attempts = self.attempts,
                len = combined.len(),
                "Dropping payload that never became valid JSON"
            );
            self.attempts = 0;
            return ParsedLine::Nothing;
        }

        self.pending = Some(combined);
        ParsedLine::Nothing
    }

    /// End of stream: discard any held-back payload.
    pub fn finish(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::warn!(len = pending.len(), "Stream ended with an unparsable payload");
        }
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(content: &str) -> String {
        format!(
            "data: {}",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    #[test]
    fn test_classify_skips_comments_and_blank_lines() {
        assert_eq!(classify_line(""), LineKind::Skip);
        assert_eq!(classify_line("   "), LineKind::Skip);
        assert_eq!(classify_line(": keepalive"), LineKind::Skip);
        assert_eq!(classify_line("event: message"), LineKind::Skip);
        assert_eq!(classify_line("id: 7"), LineKind::Skip);
    }

    #[test]
    fn test_classify_done_with_and_without_space() {
        assert_eq!(classify_line("data: [DONE]"), LineKind::Done);
        assert_eq!(classify_line("data:[DONE]"), LineKind::Done);
        assert_eq!(classify_line("data: [DONE]  "), LineKind::Done);
    }

    #[test]
    fn test_classify_control_payload_without_content() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(classify_line(line), LineKind::Payload(None));
        assert_eq!(classify_line(&delta("")), LineKind::Payload(None));
    }

    #[test]
    fn test_classify_broken_json_is_incomplete() {
        assert_eq!(
            classify_line(r#"data: {"choices":[{"del"#),
            LineKind::Incomplete(r#"{"choices":[{"del"#.to_string())
        );
    }

    #[test]
    fn test_assembler_recovers_split_payload() {
        let mut assembler = DeltaAssembler::new(8);
        assert_eq!(
            assembler.feed(r#"data: {"choices":[{"delta":{"con"#),
            ParsedLine::Nothing
        );
        assert!(assembler.has_pending());
        assert_eq!(
            assembler.feed(r#"tent":"Hi"}}]}"#),
            ParsedLine::Fragment("Hi".to_string())
        );
        assert!(!assembler.has_pending());
    }

    #[test]
    fn test_assembler_blank_line_does_not_consume_attempt() {
        let mut assembler = DeltaAssembler::new(1);
        assembler.feed(r#"data: {"choices":[{"delta":"#);
        assert_eq!(assembler.feed(""), ParsedLine::Nothing);
        assert_eq!(
            assembler.feed(r#"{"content":"ok"}}]}"#),
            ParsedLine::Fragment("ok".to_string())
        );
    }

    #[test]
    fn test_assembler_drops_after_bounded_attempts() {
        let mut assembler = DeltaAssembler::new(3);
        assembler.feed("data: {not json");
        assert_eq!(assembler.feed("still not"), ParsedLine::Nothing);
        assert_eq!(assembler.feed("nope"), ParsedLine::Nothing);
        assert!(assembler.has_pending());
        assert_eq!(assembler.feed("give up"), ParsedLine::Nothing);
        assert!(!assembler.has_pending());
        assert_eq!(
            assembler.feed(&delta("next")),
            ParsedLine::Fragment("next".to_string())
        );
    }

    #[test]
    fn test_assembler_new_event_supersedes_garbage() {
        let mut assembler = DeltaAssembler::new(8);
        assembler.feed("data: {garbage");
        assert_eq!(
            assembler.feed(&delta("fresh")),
            ParsedLine::Fragment("fresh".to_string())
        );
        assembler.feed("data: {garbage");
        assert_eq!(assembler.feed("data: [DONE]"), ParsedLine::Done);
    }

    #[test]
    fn test_assembler_comment_drops_garbage_without_spending_attempts() {
        let mut assembler = DeltaAssembler::new(8);
        assembler.feed("data: {garbage");
        assert_eq!(assembler.feed(": keepalive"), ParsedLine::Nothing);
        assert!(!assembler.has_pending());
        assert_eq!(
            assembler.feed(&delta("after")),
            ParsedLine::Fragment("after".to_string())
        );
    }

    #[test]
    fn test_finish_clears_pending() {
        let mut assembler = DeltaAssembler::new(8);
        assembler.feed("data: {");
        assembler.finish();
        assert!(!assembler.has_pending());
    }
}
