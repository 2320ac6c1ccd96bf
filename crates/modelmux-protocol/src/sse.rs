use bytes::Bytes;

/// Initial capacity for the line buffer. Most SSE lines are small; the buffer
/// grows on demand up to [`MAX_LINE_BYTES`].
pub const INITIAL_BUFFER_BYTES: usize = 64 * 1024;

/// Hard cap for a single SSE line. Some providers ship multi-megabyte
/// tool-call argument deltas on one `data:` line; anything beyond this is a
/// fatal stream error, never a truncation.
pub const MAX_LINE_BYTES: usize = 15 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SseError {
    #[error("sse line exceeds {max} bytes", max = MAX_LINE_BYTES)]
    LineTooLong,
}

/// Incremental SSE parser over arbitrary byte chunks.
///
/// `event:` sets the event type for the following `data:` lines; a blank line
/// finishes the pending event and resets the type. Comment lines (`:`) are
/// skipped. Carriage returns before the newline are trimmed.
#[derive(Debug)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl Default for SseParser {
    fn default() -> Self {
        Self {
            buffer: String::with_capacity(INITIAL_BUFFER_BYTES),
            event: None,
            data_lines: Vec::new(),
        }
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Result<Vec<SseEvent>, SseError> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Ok(Vec::new()),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Result<Vec<SseEvent>, SseError> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);

            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.finish_event(&mut events);
                continue;
            }

            if line.starts_with(':') {
                continue;
            }

            if let Some(value) = line.strip_prefix("event:") {
                let value = value.trim_start();
                self.event = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
                continue;
            }

            if let Some(value) = line.strip_prefix("data:") {
                let value = value.trim_start();
                self.data_lines.push(value.to_string());
                continue;
            }
            if line == "data" {
                self.data_lines.push(String::new());
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            return Err(SseError::LineTooLong);
        }

        Ok(events)
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(value) = line.strip_prefix("event:") {
                let value = value.trim_start();
                self.event = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.trim_start().to_string());
            }
        }
        self.finish_event(&mut events);
        events
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        let data = self.data_lines.join("\n");
        events.push(SseEvent {
            event: self.event.take(),
            data,
        });
        self.data_lines.clear();
    }
}

/// Frame one outbound SSE message with an explicit event name.
pub fn frame_event(event: &str, data: &str) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

/// Frame one outbound `data:`-only SSE message.
pub fn frame_data(data: &str) -> String {
    format!("data: {data}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_events_across_chunks() {
        let mut parser = SseParser::new();
        let mut events = parser.push_str("event: message_start\nda").unwrap();
        assert!(events.is_empty());
        events.extend(parser.push_str("ta: {\"a\":1}\n\n").unwrap());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn blank_line_resets_event_type() {
        let mut parser = SseParser::new();
        let events = parser
            .push_str("event: ping\ndata: {}\n\ndata: tail\n\n")
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("ping"));
        assert_eq!(events[1].event, None);
        assert_eq!(events[1].data, "tail");
    }

    #[test]
    fn comments_are_skipped() {
        let mut parser = SseParser::new();
        let events = parser.push_str(": keep-alive\n\ndata: x\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn oversized_line_is_fatal() {
        let mut parser = SseParser::new();
        let chunk = "x".repeat(MAX_LINE_BYTES + 2);
        assert!(matches!(
            parser.push_str(&chunk),
            Err(SseError::LineTooLong)
        ));
    }

    #[test]
    fn large_line_below_cap_survives() {
        let mut parser = SseParser::new();
        let payload = "y".repeat(2 * 1024 * 1024);
        let events = parser
            .push_str(&format!("data: {payload}\n\n"))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.len(), payload.len());
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: last").unwrap().is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "last");
    }
}
