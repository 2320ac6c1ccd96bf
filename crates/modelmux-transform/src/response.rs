//! Non-streaming response-body conversion (provider format → client format).

use modelmux_protocol::Proto;
use modelmux_protocol::claude::{ClaudeUsage, ContentBlock, MessagesResponse};
use modelmux_protocol::openai::{
    ChatChoice, ChatCompletionResponse, ChatMessage, ToolCall, ToolCallFunction, Usage,
};
use modelmux_protocol::responses::{ResponsesResponse, ResponsesUsage};
use serde_json::{Value as JsonValue, json};

use crate::TransformError;

/// What the gateway carries across a response conversion. Anything richer
/// rides the pass-through path.
#[derive(Debug, Clone, Default)]
struct CompletionFacts {
    id: String,
    model: String,
    created: i64,
    text: Option<String>,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<String>,
    prompt_tokens: i64,
    completion_tokens: i64,
}

pub fn transform_response(
    src: Proto,
    dst: Proto,
    raw: &[u8],
) -> Result<Vec<u8>, TransformError> {
    let facts = decode(src, raw)?;
    encode(dst, facts)
}

pub fn map_finish_to_stop(finish: &str) -> &'static str {
    match finish {
        "tool_calls" => "tool_use",
        "length" => "max_tokens",
        _ => "end_turn",
    }
}

pub fn map_stop_to_finish(stop: &str) -> &'static str {
    match stop {
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        _ => "stop",
    }
}

fn decode(src: Proto, raw: &[u8]) -> Result<CompletionFacts, TransformError> {
    match src {
        Proto::OpenAiChat => {
            let resp: ChatCompletionResponse =
                serde_json::from_slice(raw).map_err(|err| TransformError::decode(src, err))?;
            let usage = resp.usage.unwrap_or_default();
            let choice = resp.choices.into_iter().next();
            let (text, tool_calls, finish_reason) = match choice {
                Some(choice) => (
                    choice
                        .message
                        .content
                        .as_ref()
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                    choice.message.tool_calls.unwrap_or_default(),
                    choice.finish_reason,
                ),
                None => (None, Vec::new(), None),
            };
            Ok(CompletionFacts {
                id: resp.id,
                model: resp.model,
                created: resp.created,
                text,
                tool_calls,
                finish_reason,
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            })
        }
        Proto::Claude => {
            let resp: MessagesResponse =
                serde_json::from_slice(raw).map_err(|err| TransformError::decode(src, err))?;
            let usage = resp.usage.unwrap_or_default();
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();
            for block in resp.content {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text),
                    ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                        id: Some(id),
                        kind: Some("function".to_string()),
                        function: ToolCallFunction {
                            name,
                            arguments: input.to_string(),
                        },
                    }),
                }
            }
            Ok(CompletionFacts {
                id: resp.id,
                model: resp.model,
                created: 0,
                text: if text_parts.is_empty() {
                    None
                } else {
                    Some(text_parts.join(""))
                },
                tool_calls,
                finish_reason: resp
                    .stop_reason
                    .as_deref()
                    .map(|stop| map_stop_to_finish(stop).to_string()),
                prompt_tokens: usage.input_tokens.unwrap_or(0),
                completion_tokens: usage.output_tokens.unwrap_or(0),
            })
        }
        Proto::OpenAiResponses => {
            let resp: ResponsesResponse =
                serde_json::from_slice(raw).map_err(|err| TransformError::decode(src, err))?;
            let usage = resp.usage.unwrap_or_default();
            let text = collect_responses_output_text(&resp.output);
            Ok(CompletionFacts {
                id: resp.id,
                model: resp.model,
                created: 0,
                text,
                tool_calls: Vec::new(),
                finish_reason: Some("stop".to_string()),
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
            })
        }
    }
}

fn encode(dst: Proto, facts: CompletionFacts) -> Result<Vec<u8>, TransformError> {
    match dst {
        Proto::OpenAiChat => {
            let finish_reason = facts.finish_reason.clone().or_else(|| {
                Some(if facts.tool_calls.is_empty() {
                    "stop".to_string()
                } else {
                    "tool_calls".to_string()
                })
            });
            let resp = ChatCompletionResponse {
                id: facts.id,
                object: "chat.completion".to_string(),
                created: facts.created,
                model: facts.model,
                choices: vec![ChatChoice {
                    index: 0,
                    message: ChatMessage {
                        role: "assistant".to_string(),
                        content: facts.text.map(JsonValue::String),
                        tool_calls: if facts.tool_calls.is_empty() {
                            None
                        } else {
                            Some(facts.tool_calls)
                        },
                        tool_call_id: None,
                    },
                    finish_reason,
                }],
                usage: Some(Usage {
                    prompt_tokens: facts.prompt_tokens,
                    completion_tokens: facts.completion_tokens,
                    total_tokens: facts.prompt_tokens + facts.completion_tokens,
                }),
            };
            serde_json::to_vec(&resp).map_err(|err| TransformError::encode(dst, err))
        }
        Proto::Claude => {
            let mut content = Vec::new();
            if let Some(text) = facts.text {
                content.push(ContentBlock::Text { text });
            }
            for call in facts.tool_calls {
                content.push(ContentBlock::ToolUse {
                    id: call.id.unwrap_or_default(),
                    name: call.function.name,
                    input: serde_json::from_str(&call.function.arguments)
                        .unwrap_or(JsonValue::Object(serde_json::Map::new())),
                });
            }
            let resp = MessagesResponse {
                id: facts.id,
                kind: "message".to_string(),
                role: "assistant".to_string(),
                model: facts.model,
                content,
                stop_reason: facts
                    .finish_reason
                    .as_deref()
                    .map(|finish| map_finish_to_stop(finish).to_string()),
                usage: Some(ClaudeUsage {
                    input_tokens: Some(facts.prompt_tokens),
                    output_tokens: Some(facts.completion_tokens),
                }),
            };
            serde_json::to_vec(&resp).map_err(|err| TransformError::encode(dst, err))
        }
        Proto::OpenAiResponses => {
            let output = vec![json!({
                "type": "message",
                "role": "assistant",
                "content": [{
                    "type": "output_text",
                    "text": facts.text.unwrap_or_default(),
                }],
            })];
            let resp = ResponsesResponse {
                id: facts.id,
                object: "response".to_string(),
                model: facts.model,
                status: "completed".to_string(),
                output,
                usage: Some(ResponsesUsage {
                    input_tokens: facts.prompt_tokens,
                    output_tokens: facts.completion_tokens,
                    total_tokens: facts.prompt_tokens + facts.completion_tokens,
                }),
            };
            serde_json::to_vec(&resp).map_err(|err| TransformError::encode(dst, err))
        }
    }
}

fn collect_responses_output_text(output: &[JsonValue]) -> Option<String> {
    let mut parts = Vec::new();
    for item in output {
        if item.get("type").and_then(JsonValue::as_str) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(JsonValue::as_array) else {
            continue;
        };
        for part in content {
            if part.get("type").and_then(JsonValue::as_str) == Some("output_text")
                && let Some(text) = part.get("text").and_then(JsonValue::as_str)
            {
                parts.push(text.to_string());
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(""))
    }
}
