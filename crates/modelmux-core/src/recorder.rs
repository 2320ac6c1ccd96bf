//! Off-path accumulation of timings, usage and IO bodies.
//!
//! The recorder never sits between upstream and client; it reads the tee
//! side of the pump and updates the attempt's chat-log row after the stream
//! drains.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use modelmux_protocol::Proto;
use modelmux_protocol::sse::{SseEvent, SseParser};
use modelmux_storage::{ChatLogMetrics, Store};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::warn;

/// IO bodies beyond this are truncated before persisting.
const MAX_IO_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl UsageCounts {
    fn is_zero(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}

#[derive(Clone)]
pub struct RecordContext {
    pub chat_log_id: i64,
    /// Client-facing wire format of the recorded body.
    pub style: Proto,
    pub io_log: bool,
    pub input: Bytes,
    pub proxy_time_ms: i64,
    pub request_started: Instant,
}

#[derive(Clone)]
pub struct LogRecorder {
    store: Arc<dyn Store>,
}

impl LogRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Non-streaming response: one body, one update.
    pub fn spawn_body(&self, ctx: RecordContext, body: Bytes) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let usage = serde_json::from_slice::<JsonValue>(&body)
                .ok()
                .and_then(|value| usage_from_value(ctx.style, &value));
            let metrics = ChatLogMetrics {
                proxy_time_ms: Some(ctx.proxy_time_ms),
                prompt_tokens: usage.map(|u| u.prompt_tokens),
                completion_tokens: usage.map(|u| u.completion_tokens),
                total_tokens: usage.map(|u| u.total_tokens),
                ..Default::default()
            };
            if let Err(err) = store.update_chat_log_metrics(ctx.chat_log_id, metrics).await {
                warn!(event = "chat_log_update_failed", chat_log_id = ctx.chat_log_id, error = %err);
            }
            if ctx.io_log
                && let Err(err) = store
                    .insert_chat_io(ctx.chat_log_id, &ctx.input, &body)
                    .await
            {
                warn!(event = "chat_io_write_failed", chat_log_id = ctx.chat_log_id, error = %err);
            }
        });
    }

    /// Streaming response: drain the tee, then update.
    pub fn spawn_stream(&self, ctx: RecordContext, mut tee: mpsc::Receiver<Bytes>) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut usage: Option<UsageCounts> = None;
            let mut first_chunk: Option<Instant> = None;
            let mut last_chunk: Option<Instant> = None;
            let mut io_chunks: Vec<String> = Vec::new();
            let mut io_bytes = 0usize;

            while let Some(chunk) = tee.recv().await {
                let now = Instant::now();
                first_chunk.get_or_insert(now);
                last_chunk = Some(now);

                let events = match parser.push_bytes(&chunk) {
                    Ok(events) => events,
                    // The pump already surfaced the fatal error to the
                    // client; keep what was extracted so far.
                    Err(_) => break,
                };
                for event in events {
                    if let Some(found) = usage_from_event(ctx.style, &event) {
                        usage = Some(found);
                    }
                    if ctx.io_log && io_bytes < MAX_IO_BYTES {
                        io_bytes += event.data.len();
                        io_chunks.push(render_event(&event));
                    }
                }
            }

            let first_chunk_ms = first_chunk
                .map(|at| at.duration_since(ctx.request_started).as_millis() as i64);
            let chunk_ms = match (first_chunk, last_chunk) {
                (Some(first), Some(last)) => Some(last.duration_since(first).as_millis() as i64),
                _ => None,
            };
            let tps = match (usage, chunk_ms) {
                (Some(usage), Some(ms)) if ms > 0 && usage.total_tokens > 0 => {
                    Some(usage.total_tokens as f64 / (ms as f64 / 1000.0))
                }
                _ => None,
            };

            let metrics = ChatLogMetrics {
                proxy_time_ms: Some(ctx.proxy_time_ms),
                first_chunk_ms,
                chunk_ms,
                tps,
                prompt_tokens: usage.map(|u| u.prompt_tokens),
                completion_tokens: usage.map(|u| u.completion_tokens),
                total_tokens: usage.map(|u| u.total_tokens),
            };
            if let Err(err) = store.update_chat_log_metrics(ctx.chat_log_id, metrics).await {
                warn!(event = "chat_log_update_failed", chat_log_id = ctx.chat_log_id, error = %err);
            }

            if ctx.io_log {
                let output = serde_json::to_vec(&io_chunks).unwrap_or_default();
                if let Err(err) = store
                    .insert_chat_io(ctx.chat_log_id, &ctx.input, &output)
                    .await
                {
                    warn!(event = "chat_io_write_failed", chat_log_id = ctx.chat_log_id, error = %err);
                }
            }
        });
    }
}

fn render_event(event: &SseEvent) -> String {
    match &event.event {
        Some(name) => format!("event: {name}\ndata: {}", event.data),
        None => format!("data: {}", event.data),
    }
}

/// Usage extraction from one SSE event of the client-facing stream.
pub fn usage_from_event(style: Proto, event: &SseEvent) -> Option<UsageCounts> {
    match style {
        // Chat streams carry usage inline on data chunks; the last non-zero
        // one wins.
        Proto::OpenAiChat => {
            if event.data == "[DONE]" {
                return None;
            }
            let value: JsonValue = serde_json::from_str(&event.data).ok()?;
            usage_from_value(style, &value)
        }
        Proto::OpenAiResponses => {
            if event.event.as_deref() != Some("response.completed") {
                return None;
            }
            let value: JsonValue = serde_json::from_str(&event.data).ok()?;
            usage_from_value(style, &value)
        }
        Proto::Claude => {
            if event.event.as_deref() != Some("message_delta") {
                return None;
            }
            let value: JsonValue = serde_json::from_str(&event.data).ok()?;
            usage_from_value(style, &value)
        }
    }
}

/// Usage extraction from a complete JSON body (or one event payload).
pub fn usage_from_value(style: Proto, value: &JsonValue) -> Option<UsageCounts> {
    let usage = match style {
        Proto::OpenAiChat => {
            let usage = value.get("usage")?;
            UsageCounts {
                prompt_tokens: usage.get("prompt_tokens").and_then(JsonValue::as_i64)?,
                completion_tokens: usage
                    .get("completion_tokens")
                    .and_then(JsonValue::as_i64)
                    .unwrap_or(0),
                total_tokens: usage
                    .get("total_tokens")
                    .and_then(JsonValue::as_i64)
                    .unwrap_or(0),
            }
        }
        Proto::OpenAiResponses => {
            // Works for both the full body and the response.completed event.
            let usage = value
                .pointer("/response/usage")
                .or_else(|| value.get("usage"))?;
            UsageCounts {
                prompt_tokens: usage.get("input_tokens").and_then(JsonValue::as_i64)?,
                completion_tokens: usage
                    .get("output_tokens")
                    .and_then(JsonValue::as_i64)
                    .unwrap_or(0),
                total_tokens: usage
                    .get("total_tokens")
                    .and_then(JsonValue::as_i64)
                    .unwrap_or(0),
            }
        }
        Proto::Claude => {
            let usage = value.get("usage")?;
            let input = usage.get("input_tokens").and_then(JsonValue::as_i64)?;
            let output = usage
                .get("output_tokens")
                .and_then(JsonValue::as_i64)
                .unwrap_or(0);
            UsageCounts {
                prompt_tokens: input,
                completion_tokens: output,
                total_tokens: input + output,
            }
        }
    };
    if usage.is_zero() { None } else { Some(usage) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_stream_usage_last_non_zero_wins() {
        let zero = SseEvent {
            event: None,
            data: json!({ "usage": { "prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0 } })
                .to_string(),
        };
        assert_eq!(usage_from_event(Proto::OpenAiChat, &zero), None);

        let real = SseEvent {
            event: None,
            data: json!({ "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 } })
                .to_string(),
        };
        let usage = usage_from_event(Proto::OpenAiChat, &real).unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn claude_usage_totals_are_derived() {
        let event = SseEvent {
            event: Some("message_delta".to_string()),
            data: json!({ "usage": { "input_tokens": 7, "output_tokens": 3 } }).to_string(),
        };
        let usage = usage_from_event(Proto::Claude, &event).unwrap();
        assert_eq!(usage.total_tokens, 10);
    }

    #[test]
    fn responses_usage_comes_from_completed_event_only() {
        let delta = SseEvent {
            event: Some("response.output_text.delta".to_string()),
            data: json!({ "delta": "x" }).to_string(),
        };
        assert_eq!(usage_from_event(Proto::OpenAiResponses, &delta), None);

        let completed = SseEvent {
            event: Some("response.completed".to_string()),
            data: json!({ "response": { "usage": {
                "input_tokens": 2, "output_tokens": 4, "total_tokens": 6
            } } })
            .to_string(),
        };
        let usage = usage_from_event(Proto::OpenAiResponses, &completed).unwrap();
        assert_eq!(usage.completion_tokens, 4);
    }
}
