//! Streaming SSE re-framing between wire formats.
//!
//! Each direction is a small state machine fed parsed [`SseEvent`]s and
//! producing fully framed SSE messages, ready to write to the client pipe.
//! A chunk that fails to decode comes back as a [`ParseFailure`] carrying
//! the event name and decode error; the pump logs it and moves on, so one
//! bad chunk never terminates the stream. Output order always follows input
//! order and tool-call argument deltas are re-emitted incrementally, never
//! reassembled.

mod claude_to_openai;
mod openai_to_claude;
mod responses;

pub use claude_to_openai::ClaudeToOpenAiStream;
pub use openai_to_claude::OpenAiToClaudeStream;
pub use responses::{
    ClaudeToResponsesStream, OpenAiToResponsesStream, ResponsesToClaudeStream,
    ResponsesToOpenAiStream,
};

use modelmux_protocol::Proto;
use modelmux_protocol::sse::{SseEvent, frame_data, frame_event};

/// One upstream chunk the active direction could not decode. The stream
/// continues; the caller decides how loudly to report it.
#[derive(Debug)]
pub struct ParseFailure {
    pub event: Option<String>,
    pub error: serde_json::Error,
}

impl ParseFailure {
    pub(crate) fn new(event: &SseEvent, error: serde_json::Error) -> Self {
        Self {
            event: event.event.clone(),
            error,
        }
    }
}

pub enum StreamTransformer {
    /// Formats match or the pair has no dedicated mapping: forward frames.
    Passthrough,
    ClaudeToOpenAi(ClaudeToOpenAiStream),
    OpenAiToClaude(OpenAiToClaudeStream),
    ResponsesToOpenAi(ResponsesToOpenAiStream),
    ResponsesToClaude(ResponsesToClaudeStream),
    OpenAiToResponses(OpenAiToResponsesStream),
    ClaudeToResponses(ClaudeToResponsesStream),
}

impl StreamTransformer {
    /// `src` is the provider's wire format, `dst` the client's.
    pub fn new(src: Proto, dst: Proto, id: &str, created: i64) -> Self {
        match (src, dst) {
            (Proto::Claude, Proto::OpenAiChat) => {
                StreamTransformer::ClaudeToOpenAi(ClaudeToOpenAiStream::new(id, created))
            }
            (Proto::OpenAiChat, Proto::Claude) => {
                StreamTransformer::OpenAiToClaude(OpenAiToClaudeStream::new())
            }
            (Proto::OpenAiResponses, Proto::OpenAiChat) => {
                StreamTransformer::ResponsesToOpenAi(ResponsesToOpenAiStream::new(id, created))
            }
            (Proto::OpenAiResponses, Proto::Claude) => {
                StreamTransformer::ResponsesToClaude(ResponsesToClaudeStream::new(id))
            }
            (Proto::OpenAiChat, Proto::OpenAiResponses) => {
                StreamTransformer::OpenAiToResponses(OpenAiToResponsesStream::new(id))
            }
            (Proto::Claude, Proto::OpenAiResponses) => {
                StreamTransformer::ClaudeToResponses(ClaudeToResponsesStream::new(id))
            }
            _ => StreamTransformer::Passthrough,
        }
    }

    /// Feed one upstream SSE event; returns zero or more framed messages,
    /// or the decode failure for a chunk the direction could not read.
    pub fn push(&mut self, event: &SseEvent) -> Result<Vec<String>, ParseFailure> {
        match self {
            StreamTransformer::Passthrough => Ok(vec![match &event.event {
                Some(name) => frame_event(name, &event.data),
                None => frame_data(&event.data),
            }]),
            StreamTransformer::ClaudeToOpenAi(state) => state.push(event),
            StreamTransformer::OpenAiToClaude(state) => state.push(event),
            StreamTransformer::ResponsesToOpenAi(state) => state.push(event),
            StreamTransformer::ResponsesToClaude(state) => state.push(event),
            StreamTransformer::OpenAiToResponses(state) => state.push(event),
            StreamTransformer::ClaudeToResponses(state) => state.push(event),
        }
    }

    /// Flush terminal frames after upstream EOF.
    pub fn finish(&mut self) -> Vec<String> {
        match self {
            StreamTransformer::Passthrough => Vec::new(),
            StreamTransformer::ClaudeToOpenAi(state) => state.finish(),
            StreamTransformer::OpenAiToClaude(state) => state.finish(),
            StreamTransformer::ResponsesToOpenAi(state) => state.finish(),
            StreamTransformer::ResponsesToClaude(state) => state.finish(),
            StreamTransformer::OpenAiToResponses(state) => state.finish(),
            StreamTransformer::ClaudeToResponses(state) => state.finish(),
        }
    }
}
