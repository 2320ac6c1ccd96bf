//! Stream mappings involving the OpenAI responses API.
//!
//! The responses wire carries many event kinds the gateway does not model;
//! these directions forward text deltas and the terminal usage event only,
//! matching the behaviour of the upstream these rules were lifted from.

use modelmux_protocol::claude::{ClaudeUsage, MessageDeltaBody, StreamEvent};
use modelmux_protocol::openai::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, Usage,
};
use modelmux_protocol::responses::{OutputTextDelta, ResponseCompleted, ResponsesUsage};
use modelmux_protocol::sse::{SseEvent, frame_data, frame_event};
use serde_json::json;

use super::ParseFailure;

const TEXT_DELTA_EVENT: &str = "response.output_text.delta";
const COMPLETED_EVENT: &str = "response.completed";

fn map_responses_usage(usage: &ResponsesUsage) -> Usage {
    Usage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: if usage.total_tokens != 0 {
            usage.total_tokens
        } else {
            usage.input_tokens + usage.output_tokens
        },
    }
}

// ---- responses → openai chat ----

pub struct ResponsesToOpenAiStream {
    id: String,
    created: i64,
    done_emitted: bool,
}

impl ResponsesToOpenAiStream {
    pub fn new(id: &str, created: i64) -> Self {
        Self {
            id: id.to_string(),
            created,
            done_emitted: false,
        }
    }

    pub fn push(&mut self, event: &SseEvent) -> Result<Vec<String>, ParseFailure> {
        if event.data == "[DONE]" {
            return Ok(self.done());
        }
        match event.event.as_deref() {
            Some(TEXT_DELTA_EVENT) => {
                let delta = serde_json::from_str::<OutputTextDelta>(&event.data)
                    .map_err(|err| ParseFailure::new(event, err))?;
                Ok(vec![frame_data(
                    &serde_json::to_string(&self.chunk(
                        ChunkDelta {
                            content: Some(delta.delta),
                            ..Default::default()
                        },
                        None,
                        None,
                    ))
                    .unwrap_or_default(),
                )])
            }
            Some(COMPLETED_EVENT) => {
                let completed = serde_json::from_str::<ResponseCompleted>(&event.data)
                    .map_err(|err| ParseFailure::new(event, err))?;
                let usage = completed.response.usage.as_ref().map(map_responses_usage);
                let mut frames = vec![frame_data(
                    &serde_json::to_string(&self.chunk(
                        ChunkDelta::default(),
                        Some("stop".to_string()),
                        usage,
                    ))
                    .unwrap_or_default(),
                )];
                frames.extend(self.done());
                Ok(frames)
            }
            _ => Ok(Vec::new()),
        }
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.done()
    }

    fn done(&mut self) -> Vec<String> {
        if self.done_emitted {
            return Vec::new();
        }
        self.done_emitted = true;
        vec![frame_data("[DONE]")]
    }

    fn chunk(
        &self,
        delta: ChunkDelta,
        finish_reason: Option<String>,
        usage: Option<Usage>,
    ) -> ChatCompletionChunk {
        let mut chunk = ChatCompletionChunk::new(&self.id, "response", self.created);
        chunk.choices = vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }];
        chunk.usage = usage;
        chunk
    }
}

// ---- responses → claude ----

pub struct ResponsesToClaudeStream {
    id: String,
    started: bool,
    finished: bool,
}

impl ResponsesToClaudeStream {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            started: false,
            finished: false,
        }
    }

    pub fn push(&mut self, event: &SseEvent) -> Result<Vec<String>, ParseFailure> {
        if event.data == "[DONE]" {
            return Ok(self.stop(None));
        }
        match event.event.as_deref() {
            Some(TEXT_DELTA_EVENT) => {
                let delta = serde_json::from_str::<OutputTextDelta>(&event.data)
                    .map_err(|err| ParseFailure::new(event, err))?;
                let mut frames = self.ensure_started();
                frames.push(frame_event(
                    "content_block_delta",
                    &serde_json::to_string(&StreamEvent::ContentBlockDelta {
                        index: 0,
                        delta: modelmux_protocol::claude::BlockDelta::TextDelta {
                            text: delta.delta,
                        },
                    })
                    .unwrap_or_default(),
                ));
                Ok(frames)
            }
            Some(COMPLETED_EVENT) => {
                let completed = serde_json::from_str::<ResponseCompleted>(&event.data)
                    .map_err(|err| ParseFailure::new(event, err))?;
                Ok(self.stop(completed.response.usage))
            }
            _ => Ok(Vec::new()),
        }
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.stop(None)
    }

    fn ensure_started(&mut self) -> Vec<String> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        vec![
            frame_event(
                "message_start",
                &json!({
                    "type": "message_start",
                    "message": {
                        "id": self.id,
                        "type": "message",
                        "role": "assistant",
                        "content": [],
                    },
                })
                .to_string(),
            ),
            frame_event(
                "content_block_start",
                &json!({
                    "type": "content_block_start",
                    "index": 0,
                    "content_block": { "type": "text", "text": "" },
                })
                .to_string(),
            ),
        ]
    }

    fn stop(&mut self, usage: Option<ResponsesUsage>) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut frames = Vec::new();
        if self.started {
            frames.push(frame_event(
                "content_block_stop",
                &json!({ "type": "content_block_stop", "index": 0 }).to_string(),
            ));
        }
        frames.push(frame_event(
            "message_delta",
            &serde_json::to_string(&StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some("end_turn".to_string()),
                },
                usage: usage.map(|usage| ClaudeUsage {
                    input_tokens: Some(usage.input_tokens),
                    output_tokens: Some(usage.output_tokens),
                }),
            })
            .unwrap_or_default(),
        ));
        frames.push(frame_event(
            "message_stop",
            &json!({ "type": "message_stop" }).to_string(),
        ));
        frames
    }
}

// ---- openai chat → responses ----

pub struct OpenAiToResponsesStream {
    id: String,
    finished: bool,
    pending_usage: Option<Usage>,
}

impl OpenAiToResponsesStream {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            finished: false,
            pending_usage: None,
        }
    }

    pub fn push(&mut self, event: &SseEvent) -> Result<Vec<String>, ParseFailure> {
        if event.data == "[DONE]" {
            return Ok(self.completed());
        }
        let chunk = serde_json::from_str::<ChatCompletionChunk>(&event.data)
            .map_err(|err| ParseFailure::new(event, err))?;
        if let Some(usage) = &chunk.usage {
            self.pending_usage = Some(usage.clone());
        }
        let Some(choice) = chunk.choices.first() else {
            return Ok(Vec::new());
        };

        let mut frames = Vec::new();
        if let Some(text) = &choice.delta.content
            && !text.is_empty()
        {
            frames.push(frame_event(
                TEXT_DELTA_EVENT,
                &json!({ "type": TEXT_DELTA_EVENT, "delta": text }).to_string(),
            ));
        }
        if choice.finish_reason.is_some() {
            frames.extend(self.completed());
        }
        Ok(frames)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.completed()
    }

    fn completed(&mut self) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let usage = self.pending_usage.take().map(|usage| ResponsesUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        });
        vec![frame_event(
            COMPLETED_EVENT,
            &json!({
                "type": COMPLETED_EVENT,
                "response": {
                    "id": self.id,
                    "object": "response",
                    "status": "completed",
                    "usage": usage,
                },
            })
            .to_string(),
        )]
    }
}

// ---- claude → responses ----

pub struct ClaudeToResponsesStream {
    id: String,
    finished: bool,
    pending_usage: Option<ClaudeUsage>,
}

impl ClaudeToResponsesStream {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            finished: false,
            pending_usage: None,
        }
    }

    pub fn push(&mut self, event: &SseEvent) -> Result<Vec<String>, ParseFailure> {
        if event.data == "[DONE]" {
            return Ok(self.completed());
        }
        let parsed = serde_json::from_str::<StreamEvent>(&event.data)
            .map_err(|err| ParseFailure::new(event, err))?;
        Ok(match parsed {
            StreamEvent::ContentBlockDelta {
                delta: modelmux_protocol::claude::BlockDelta::TextDelta { text },
                ..
            } => vec![frame_event(
                TEXT_DELTA_EVENT,
                &json!({ "type": TEXT_DELTA_EVENT, "delta": text }).to_string(),
            )],
            StreamEvent::MessageDelta { usage, .. } => {
                if let Some(usage) = usage {
                    self.pending_usage = Some(usage);
                }
                Vec::new()
            }
            StreamEvent::MessageStop => self.completed(),
            _ => Vec::new(),
        })
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.completed()
    }

    fn completed(&mut self) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let usage = self.pending_usage.take().map(|usage| {
            let input = usage.input_tokens.unwrap_or(0);
            let output = usage.output_tokens.unwrap_or(0);
            ResponsesUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            }
        });
        vec![frame_event(
            COMPLETED_EVENT,
            &json!({
                "type": COMPLETED_EVENT,
                "response": {
                    "id": self.id,
                    "object": "response",
                    "status": "completed",
                    "usage": usage,
                },
            })
            .to_string(),
        )]
    }
}
