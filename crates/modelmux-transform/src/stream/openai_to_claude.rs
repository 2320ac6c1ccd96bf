use modelmux_protocol::claude::{ClaudeUsage, MessageDeltaBody, StreamEvent};
use modelmux_protocol::openai::{ChatCompletionChunk, Usage};
use modelmux_protocol::sse::{SseEvent, frame_event};
use serde_json::json;

use super::ParseFailure;
use crate::response::map_finish_to_stop;

/// OpenAI chat-completions stream → Anthropic messages stream.
pub struct OpenAiToClaudeStream {
    started: bool,
    block_open: bool,
    finished: bool,
    pending_usage: Option<Usage>,
}

impl OpenAiToClaudeStream {
    pub fn new() -> Self {
        Self {
            started: false,
            block_open: false,
            finished: false,
            pending_usage: None,
        }
    }

    pub fn push(&mut self, event: &SseEvent) -> Result<Vec<String>, ParseFailure> {
        if event.data == "[DONE]" {
            return Ok(self.stop_frames(None, None));
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&event.data)
            .map_err(|err| ParseFailure::new(event, err))?;

        let mut frames = Vec::new();

        // `stream_options.include_usage` delivers usage on a trailing chunk
        // with no choices; hold it for the terminal message_delta.
        if let Some(usage) = &chunk.usage {
            self.pending_usage = Some(usage.clone());
        }
        let Some(choice) = chunk.choices.first() else {
            return Ok(frames);
        };

        if !self.started && (choice.delta.role.is_some() || choice.delta.content.is_some()) {
            self.started = true;
            self.block_open = true;
            frames.push(frame_event(
                "message_start",
                &json!({
                    "type": "message_start",
                    "message": {
                        "id": chunk.id,
                        "type": "message",
                        "role": "assistant",
                        "model": chunk.model,
                        "content": [],
                    },
                })
                .to_string(),
            ));
            frames.push(frame_event(
                "content_block_start",
                &json!({
                    "type": "content_block_start",
                    "index": 0,
                    "content_block": { "type": "text", "text": "" },
                })
                .to_string(),
            ));
        }

        if let Some(text) = &choice.delta.content
            && !text.is_empty()
        {
            frames.push(frame_event(
                "content_block_delta",
                &serde_json::to_string(&StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: modelmux_protocol::claude::BlockDelta::TextDelta {
                        text: text.clone(),
                    },
                })
                .unwrap_or_default(),
            ));
        }

        if let Some(finish) = &choice.finish_reason {
            let stop_reason = map_finish_to_stop(finish).to_string();
            let usage = self.pending_usage.take();
            frames.extend(self.stop_frames(Some(stop_reason), usage));
        }

        Ok(frames)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.stop_frames(None, None)
    }

    fn stop_frames(&mut self, stop_reason: Option<String>, usage: Option<Usage>) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut frames = Vec::new();
        if self.block_open {
            self.block_open = false;
            frames.push(frame_event(
                "content_block_stop",
                &json!({ "type": "content_block_stop", "index": 0 }).to_string(),
            ));
        }
        if stop_reason.is_some() || usage.is_some() {
            let event = StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason,
                },
                usage: usage.map(|usage| ClaudeUsage {
                    input_tokens: Some(usage.prompt_tokens),
                    output_tokens: Some(usage.completion_tokens),
                }),
            };
            frames.push(frame_event(
                "message_delta",
                &serde_json::to_string(&event).unwrap_or_default(),
            ));
        }
        frames.push(frame_event(
            "message_stop",
            &json!({ "type": "message_stop" }).to_string(),
        ));
        frames
    }
}

impl Default for OpenAiToClaudeStream {
    fn default() -> Self {
        Self::new()
    }
}
