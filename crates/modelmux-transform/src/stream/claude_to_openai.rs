use modelmux_protocol::claude::{BlockDelta, ClaudeUsage, StreamEvent};
use modelmux_protocol::openai::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ToolCallChunk, ToolCallChunkFunction, Usage,
};
use modelmux_protocol::sse::{SseEvent, frame_data};
use serde_json::Value as JsonValue;

use super::ParseFailure;

/// Anthropic messages stream → OpenAI chat-completions stream.
///
/// `message_start`, `ping` and `content_block_stop` are dropped; everything
/// else maps one-to-one so no output chunk ever precedes its input event.
pub struct ClaudeToOpenAiStream {
    id: String,
    created: i64,
    done_emitted: bool,
}

impl ClaudeToOpenAiStream {
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

        let parsed = serde_json::from_str::<StreamEvent>(&event.data)
            .map_err(|err| ParseFailure::new(event, err))?;

        Ok(match parsed {
            StreamEvent::MessageStart { .. }
            | StreamEvent::Ping
            | StreamEvent::ContentBlockStop { .. }
            | StreamEvent::Error { .. } => Vec::new(),
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => self.map_block_start(index, &content_block),
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => vec![self.frame(ChunkDelta {
                    content: Some(text),
                    ..Default::default()
                })],
                BlockDelta::InputJsonDelta { partial_json } => {
                    vec![self.frame(ChunkDelta {
                        tool_calls: Some(vec![ToolCallChunk {
                            index,
                            id: None,
                            kind: None,
                            function: Some(ToolCallChunkFunction {
                                name: None,
                                arguments: Some(partial_json),
                            }),
                        }]),
                        ..Default::default()
                    })]
                }
                BlockDelta::Other => Vec::new(),
            },
            StreamEvent::MessageDelta { delta, usage } => {
                let finish_reason = delta
                    .stop_reason
                    .as_deref()
                    .map(|stop| map_stop_reason(stop).to_string());
                if finish_reason.is_none() && usage.is_none() {
                    Vec::new()
                } else {
                    let mut chunk = self.chunk(ChunkDelta::default(), finish_reason);
                    chunk.usage = usage.as_ref().map(map_usage);
                    vec![frame_chunk(&chunk)]
                }
            }
            StreamEvent::MessageStop => self.done(),
        })
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.done()
    }

    fn map_block_start(&mut self, index: u32, content_block: &JsonValue) -> Vec<String> {
        if content_block.get("type").and_then(JsonValue::as_str) != Some("tool_use") {
            return Vec::new();
        }
        let id = content_block
            .get("id")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        let name = content_block
            .get("name")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        vec![self.frame(ChunkDelta {
            role: Some("assistant".to_string()),
            tool_calls: Some(vec![ToolCallChunk {
                index,
                id: Some(id),
                kind: Some("function".to_string()),
                function: Some(ToolCallChunkFunction {
                    name: Some(name),
                    arguments: Some(String::new()),
                }),
            }]),
            ..Default::default()
        })]
    }

    fn done(&mut self) -> Vec<String> {
        if self.done_emitted {
            return Vec::new();
        }
        self.done_emitted = true;
        vec![frame_data("[DONE]")]
    }

    fn frame(&self, delta: ChunkDelta) -> String {
        frame_chunk(&self.chunk(delta, None))
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        let mut chunk = ChatCompletionChunk::new(&self.id, "claude", self.created);
        chunk.choices = vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }];
        chunk
    }
}

fn frame_chunk(chunk: &ChatCompletionChunk) -> String {
    frame_data(&serde_json::to_string(chunk).unwrap_or_default())
}

fn map_stop_reason(stop: &str) -> &'static str {
    match stop {
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        _ => "stop",
    }
}

fn map_usage(usage: &ClaudeUsage) -> Usage {
    let input = usage.input_tokens.unwrap_or(0);
    let output = usage.output_tokens.unwrap_or(0);
    Usage {
        prompt_tokens: input,
        completion_tokens: output,
        total_tokens: input + output,
    }
}
