//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks; [`SseDecoder::feed`] buffers partial
//! lines and returns every event completed by the chunk. Lines end in `\n`
//! or `\r\n`. A UTF-8 byte-order mark before the first line is skipped.
//! `id` and `retry` fields are accepted and ignored, as are comment lines
//! starting with `:`. An event still open when the stream ends is discarded.
//!
//! Lines longer than the decoder's limit, and events whose data outgrows it,
//! are dropped together with the event they belong to.

use tracing::{debug, warn};

/// Event type assumed when an event has no `event:` field.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Default limit on the length of one line and of one event's data.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024 * 1024;

const BOM: char = '\u{feff}';

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, or [`DEFAULT_EVENT_TYPE`].
    pub event: String,
    /// All `data:` lines of the event joined with `\n`.
    pub data: String,
}

/// Line-oriented `text/event-stream` parser.
#[derive(Debug)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: String,
    max_line_len: usize,
    /// Set while the rest of an oversized line is being skipped.
    skipping: bool,
    seen_line: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    /// Create a decoder with an empty buffer and [`DEFAULT_MAX_LINE_LEN`].
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    /// Create a decoder that drops lines and event data longer than
    /// `max_line_len` bytes.
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            event: None,
            data: String::new(),
            max_line_len: max_line_len.max(1),
            skipping: false,
            seen_line: false,
        }
    }

    /// Append `chunk` and return the events it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if std::mem::take(&mut self.skipping) {
                continue;
            }
            if line.len() > self.max_line_len {
                self.drop_oversized(line.len());
                continue;
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let decoded = String::from_utf8_lossy(&line);
            let first = !std::mem::replace(&mut self.seen_line, true);
            let text = match decoded.strip_prefix(BOM) {
                Some(rest) if first => rest,
                _ => &*decoded,
            };
            if let Some(event) = self.process_line(text) {
                events.push(event);
            }
        }
        if self.skipping {
            self.buf.clear();
        } else if self.buf.len() > self.max_line_len {
            self.drop_oversized(self.buf.len());
            self.buf.clear();
            self.skipping = true;
        }
        events
    }

    fn drop_oversized(&mut self, len: usize) {
        warn!(
            len,
            max = self.max_line_len,
            "dropping oversized event-stream line"
        );
        self.seen_line = true;
        self.event = None;
        self.data.clear();
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.data.len() + value.len() >= self.max_line_len {
                    warn!(
                        max = self.max_line_len,
                        "dropping event whose data exceeds the limit"
                    );
                    self.event = None;
                    self.data.clear();
                    return None;
                }
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => self.event = Some(value.to_owned()),
            "id" | "retry" => {}
            other => debug!(field = other, "ignoring unknown event-stream field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let mut data = std::mem::take(&mut self.data);
        data.pop();
        Some(SseEvent {
            event: event.unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_owned()),
            data,
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn message(data: &str) -> SseEvent {
        SseEvent {
            event: DEFAULT_EVENT_TYPE.into(),
            data: data.into(),
        }
    }

    #[test]
    fn decodes_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"id\": 1}\n\n");
        assert_eq!(events, vec![message("{\"id\": 1}")]);
    }

    #[test]
    fn joins_multi_line_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\ndata:   \"id\": 1\ndata: }\n\n");
        assert_eq!(events, vec![message("{\n  \"id\": 1\n}")]);
    }

    #[test]
    fn named_events_keep_their_type() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: ping\ndata: x\n\ndata: y\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "ping".into(),
                    data: "x".into()
                },
                message("y"),
            ]
        );
    }

    #[test]
    fn lines_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"da").is_empty());
        assert!(decoder.feed(b"ta: hel").is_empty());
        assert!(decoder.feed(b"lo\r\n").is_empty());
        assert_eq!(decoder.feed(b"\r\n"), vec![message("hello")]);
    }

    #[test]
    fn comments_and_bookkeeping_fields_are_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\n\nid: 7\nretry: 1000\ndata: z\n\n");
        assert_eq!(events, vec![message("z")]);
    }

    #[test]
    fn event_without_data_is_not_dispatched() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: ping\n\n").is_empty());
        // The event type does not leak into the next event.
        assert_eq!(decoder.feed(b"data: a\n\n"), vec![message("a")]);
    }

    #[test]
    fn only_one_leading_space_is_stripped() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.feed(b"data:  two\n\n"), vec![message(" two")]);
        assert_eq!(decoder.feed(b"data:none\n\n"), vec![message("none")]);
    }

    #[test]
    fn unterminated_event_is_held_back() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: partial\n").is_empty());
    }

    #[test]
    fn leading_byte_order_mark_is_skipped() {
        let mut decoder = SseDecoder::new();
        assert_eq!(
            decoder.feed(b"\xef\xbb\xbfdata: a\n\n"),
            vec![message("a")]
        );
        // Only at the start of the stream.
        let events = decoder.feed(b"\xef\xbb\xbfdata: b\n\ndata: c\n\n");
        assert_eq!(events, vec![message("c")]);
    }

    #[test]
    fn byte_order_mark_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"\xef\xbb").is_empty());
        assert_eq!(decoder.feed(b"\xbfdata: a\n\n"), vec![message("a")]);
    }

    #[test]
    fn unterminated_oversized_line_is_discarded() {
        let mut decoder = SseDecoder::with_max_line_len(16);
        assert!(decoder.feed(b"data: ok\n").is_empty());
        assert!(decoder.feed(&[b'x'; 40]).is_empty());
        assert!(decoder.buf.is_empty());
        assert!(decoder.feed(&[b'y'; 40]).is_empty());
        assert!(decoder.buf.is_empty());

        // The rest of the long line and its event are dropped; decoding
        // resumes on the next line.
        assert!(decoder.feed(b"tail\n\n").is_empty());
        assert_eq!(decoder.feed(b"data: next\n\n"), vec![message("next")]);
    }

    #[test]
    fn oversized_line_in_one_chunk_drops_its_event() {
        let mut decoder = SseDecoder::with_max_line_len(16);
        let mut chunk = b"data: a\ndata: ".to_vec();
        chunk.extend_from_slice(&[b'z'; 32]);
        chunk.extend_from_slice(b"\n\ndata: b\n\n");
        assert_eq!(decoder.feed(&chunk), vec![message("b")]);
    }

    #[test]
    fn event_data_over_the_limit_is_dropped() {
        let mut decoder = SseDecoder::with_max_line_len(16);
        let events = decoder.feed(b"data: 0123456\ndata: 0123456\ndata: 0123\n\ndata: ok\n\n");
        assert_eq!(events, vec![message("ok")]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: \xff\n\n");
        assert_eq!(events, vec![message("\u{fffd}")]);
    }
}
