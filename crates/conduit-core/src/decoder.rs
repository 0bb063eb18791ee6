//! Incremental JSONL decoding of agent stdout.
//!
//! Agents write one JSON document per line, but stdout arrives in arbitrary
//! chunks. [`LineDecoder`] carries the incomplete tail of each chunk over to
//! the next one and only parses complete lines. Decoding is best-effort:
//! blank lines and lines that are not valid JSON (diagnostic noise some CLI
//! versions print on stdout) are dropped without failing the run.

use serde_json::Value;
use tracing::{trace, warn};

/// Default maximum length of a single line: 16 MiB.
///
/// A line that grows past the limit is discarded up to its terminating
/// newline instead of being buffered without bound.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Splits a byte stream into JSON values, one per complete line.
#[derive(Debug)]
pub struct LineDecoder {
    carry: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            carry: Vec::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    /// Feed one chunk and return every value completed by it, in order.
    ///
    /// Operates on bytes, so a multi-byte UTF-8 sequence split across two
    /// chunks is reassembled before it is decoded.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        let mut values = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (line, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                self.carry.clear();
                continue;
            }

            self.carry.extend_from_slice(line);
            if self.carry.len() > self.max_line_bytes {
                warn!(
                    bytes = self.carry.len(),
                    limit = self.max_line_bytes,
                    "dropping oversized agent output line"
                );
            } else if let Some(value) = parse_line(&self.carry) {
                values.push(value);
            }
            self.carry.clear();
        }

        if !self.discarding {
            self.carry.extend_from_slice(rest);
            if self.carry.len() > self.max_line_bytes {
                warn!(
                    bytes = self.carry.len(),
                    limit = self.max_line_bytes,
                    "agent output line exceeds limit, discarding until next newline"
                );
                self.carry.clear();
                self.discarding = true;
            }
        }

        values
    }

    /// Flush the retained fragment at end of stream.
    ///
    /// The last event frequently arrives without a trailing newline; it is
    /// still returned when it parses.
    pub fn finish(&mut self) -> Option<Value> {
        let line = std::mem::take(&mut self.carry);
        let was_discarding = std::mem::replace(&mut self.discarding, false);
        if was_discarding {
            return None;
        }
        parse_line(&line)
    }

    /// Whether an incomplete line is currently buffered.
    pub fn has_pending(&self) -> bool {
        !self.carry.is_empty()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a fully buffered stdout capture.
///
/// Output that is a single JSON document (the non-streaming print mode) is
/// returned as-is, with a top-level array flattened into its elements.
/// Anything else is decoded line by line.
pub fn decode_all(bytes: &[u8]) -> Vec<Value> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return match value {
            Value::Array(items) => items,
            other => vec![other],
        };
    }

    let mut decoder = LineDecoder::new();
    let mut values = decoder.push(bytes);
    values.extend(decoder.finish());
    values
}

fn parse_line(bytes: &[u8]) -> Option<Value> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str(trimmed) {
        Ok(value) => Some(value),
        Err(e) => {
            trace!(error = %e, line = %truncate(trimmed, 200), "skipping non-JSON agent output");
            None
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_line_is_carried_to_next_chunk() {
        let mut decoder = LineDecoder::new();

        let first = decoder.push(b"{\"a\":1}\n{\"b\":");
        assert_eq!(first, vec![json!({"a": 1})]);
        assert!(decoder.has_pending());

        let second = decoder.push(b"2}\n");
        assert_eq!(second, vec![json!({"b": 2})]);
        assert!(!decoder.has_pending());
    }

    #[test]
    fn finish_flushes_line_without_trailing_newline() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"{\"type\":\"result\",\"result\":\"ok\"}").is_empty());
        assert_eq!(
            decoder.finish(),
            Some(json!({"type": "result", "result": "ok"}))
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn finish_ignores_incomplete_json() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"{\"type\":\"resu");
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn blank_and_malformed_lines_are_dropped() {
        let mut decoder = LineDecoder::new();
        let values = decoder.push(
            b"\n   \n2025-01-01T00:00:00Z ERROR codex: reconnecting\n{\"ok\":true}\n{broken\n",
        );
        assert_eq!(values, vec![json!({"ok": true})]);
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let mut decoder = LineDecoder::new();
        let values = decoder.push(b"{\"a\":1}\r\n{\"a\":2}\r\n");
        assert_eq!(values, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let line = "{\"text\":\"héllo ✓\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = LineDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        let values = decoder.push(&line[split..]);
        assert_eq!(values, vec![json!({"text": "héllo ✓"})]);
    }

    #[test]
    fn byte_at_a_time_preserves_order() {
        let input = b"{\"n\":1}\n{\"n\":2}\n{\"n\":3}";
        let mut decoder = LineDecoder::new();
        let mut values = Vec::new();
        for byte in input {
            values.extend(decoder.push(std::slice::from_ref(byte)));
        }
        values.extend(decoder.finish());
        assert_eq!(values, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
    }

    #[test]
    fn oversized_line_is_discarded_until_newline() {
        let mut decoder = LineDecoder::with_max_line_bytes(16);
        assert!(decoder.push(b"{\"text\":\"aaaaaaaaaaaaaaaaaaaa").is_empty());
        assert!(decoder.push(b"aaaaaaaa\"}").is_empty());
        let values = decoder.push(b"\n{\"n\":1}\n");
        assert_eq!(values, vec![json!({"n": 1})]);
    }

    #[test]
    fn decode_all_reads_single_document() {
        let out = b"{\n  \"type\": \"result\",\n  \"result\": \"done\"\n}\n";
        assert_eq!(
            decode_all(out),
            vec![json!({"type": "result", "result": "done"})]
        );
    }

    #[test]
    fn decode_all_flattens_top_level_array() {
        let out = br#"[{"type":"system"},{"type":"result","result":"x"}]"#;
        assert_eq!(decode_all(out).len(), 2);
    }

    #[test]
    fn decode_all_falls_back_to_lines() {
        let out = b"{\"a\":1}\nnoise\n{\"a\":2}";
        assert_eq!(decode_all(out), vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn decode_all_of_plain_text_is_empty() {
        assert!(decode_all(b"just some text\n").is_empty());
        assert!(decode_all(b"").is_empty());
    }
}
