//! Protocol-neutral request intermediate.
//!
//! Conversion between any two of the three wire formats goes through
//! [`UnifiedMessage`]; the matching-format fast path never touches this
//! module (pass-through is mandatory for field fidelity).

use modelmux_protocol::claude::{ClaudeMessage, ClaudeTool, MessagesRequest};
use modelmux_protocol::openai::{
    ChatCompletionRequest, ChatMessage, FunctionDefinition, StreamOptions, ToolCall,
    ToolCallFunction, ToolDefinition,
};
use modelmux_protocol::responses::ResponsesRequest;
use serde_json::{Value as JsonValue, json};

/// Anthropic requires `max_tokens`; applied when the source request has none.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Default)]
pub struct UnifiedMessage {
    pub model: String,
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub system: Option<String>,
    pub messages: Vec<UnifiedChatMessage>,
    pub tools: Vec<UnifiedTool>,
}

#[derive(Debug, Clone, Default)]
pub struct UnifiedChatMessage {
    pub role: String,
    pub content: Option<JsonValue>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UnifiedTool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Option<JsonValue>,
}

// ---- into unified ----

pub fn openai_to_unified(req: ChatCompletionRequest) -> UnifiedMessage {
    let has_non_system = req.messages.iter().any(|m| m.role != "system");

    let mut system_parts = Vec::new();
    let mut messages = Vec::new();
    for message in req.messages {
        // System messages consolidate into the top-level field only when the
        // request has real conversation turns; a system-only request keeps
        // them in place so the upstream rejects it with its own error.
        if message.role == "system" && has_non_system {
            if let Some(text) = content_text(message.content.as_ref()) {
                system_parts.push(text);
            }
            continue;
        }
        messages.push(UnifiedChatMessage {
            role: message.role,
            content: message.content,
            tool_calls: message.tool_calls.unwrap_or_default(),
            tool_call_id: message.tool_call_id,
        });
    }

    UnifiedMessage {
        model: req.model,
        stream: req.stream.unwrap_or(false),
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        system: join_nonempty(system_parts),
        messages,
        tools: req
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|tool| UnifiedTool {
                name: tool.function.name,
                description: tool.function.description,
                parameters: tool.function.parameters,
            })
            .collect(),
    }
}

pub fn claude_to_unified(req: MessagesRequest) -> UnifiedMessage {
    let mut messages = Vec::new();
    for message in req.messages {
        messages.extend(map_claude_message(message));
    }

    UnifiedMessage {
        model: req.model,
        stream: req.stream.unwrap_or(false),
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        system: claude_system_text(req.system),
        messages,
        tools: req
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|tool| UnifiedTool {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
            })
            .collect(),
    }
}

pub fn responses_to_unified(req: ResponsesRequest) -> UnifiedMessage {
    let mut messages = Vec::new();
    match req.input {
        Some(JsonValue::String(text)) => messages.push(UnifiedChatMessage {
            role: "user".to_string(),
            content: Some(JsonValue::String(text)),
            ..Default::default()
        }),
        Some(JsonValue::Array(items)) => {
            for item in items {
                if let Some(message) = map_responses_input_item(&item) {
                    messages.push(message);
                }
            }
        }
        _ => {}
    }

    UnifiedMessage {
        model: req.model,
        stream: req.stream.unwrap_or(false),
        max_tokens: req.max_output_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        system: req.instructions,
        messages,
        tools: req
            .tools
            .unwrap_or_default()
            .iter()
            .filter_map(map_responses_tool)
            .collect(),
    }
}

// ---- out of unified ----

pub fn unified_to_openai(unified: UnifiedMessage) -> ChatCompletionRequest {
    let mut messages = Vec::new();
    if let Some(system) = unified.system {
        messages.push(ChatMessage::text("system", system));
    }
    for message in unified.messages {
        messages.push(ChatMessage {
            role: message.role,
            content: message.content,
            tool_calls: if message.tool_calls.is_empty() {
                None
            } else {
                Some(message.tool_calls)
            },
            tool_call_id: message.tool_call_id,
        });
    }

    let stream = unified.stream;
    ChatCompletionRequest {
        model: unified.model,
        messages,
        tools: to_openai_tools(unified.tools),
        stream: if stream { Some(true) } else { None },
        // Usage must always be reported on streaming responses so the log
        // recorder can account tokens.
        stream_options: if stream {
            Some(StreamOptions {
                include_usage: true,
            })
        } else {
            None
        },
        response_format: None,
        max_tokens: unified.max_tokens,
        temperature: unified.temperature,
        top_p: unified.top_p,
    }
}

pub fn unified_to_claude(unified: UnifiedMessage) -> MessagesRequest {
    let mut messages = Vec::new();
    for message in unified.messages {
        messages.extend(map_unified_to_claude_message(message));
    }

    MessagesRequest {
        model: unified.model,
        max_tokens: unified.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: unified.system.map(JsonValue::String),
        tools: to_claude_tools(unified.tools),
        stream: if unified.stream { Some(true) } else { None },
        temperature: unified.temperature,
        top_p: unified.top_p,
    }
}

pub fn unified_to_responses(unified: UnifiedMessage) -> ResponsesRequest {
    let input: Vec<JsonValue> = unified
        .messages
        .iter()
        .filter_map(|message| {
            let text = content_text(message.content.as_ref())?;
            Some(json!({ "role": message.role, "content": text }))
        })
        .collect();

    ResponsesRequest {
        model: unified.model,
        input: Some(JsonValue::Array(input)),
        instructions: unified.system,
        text: None,
        tools: responses_tools(unified.tools),
        stream: if unified.stream { Some(true) } else { None },
        max_output_tokens: unified.max_tokens,
        temperature: unified.temperature,
        top_p: unified.top_p,
    }
}

// ---- helpers ----

/// Flatten a chat `content` value (plain string or part array) to text.
pub fn content_text(content: Option<&JsonValue>) -> Option<String> {
    match content? {
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(JsonValue::as_str))
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
        _ => None,
    }
}

fn join_nonempty(parts: Vec<String>) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

fn claude_system_text(system: Option<JsonValue>) -> Option<String> {
    match system? {
        JsonValue::String(text) => Some(text),
        JsonValue::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(JsonValue::as_str))
                .collect();
            join_nonempty(texts.into_iter().map(str::to_string).collect())
        }
        _ => None,
    }
}

fn map_claude_message(message: ClaudeMessage) -> Vec<UnifiedChatMessage> {
    let blocks = match message.content {
        JsonValue::String(text) => {
            return vec![UnifiedChatMessage {
                role: message.role,
                content: Some(JsonValue::String(text)),
                ..Default::default()
            }];
        }
        JsonValue::Array(blocks) => blocks,
        other => {
            return vec![UnifiedChatMessage {
                role: message.role,
                content: Some(other),
                ..Default::default()
            }];
        }
    };

    let mut output = Vec::new();
    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &blocks {
        match block.get("type").and_then(JsonValue::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(JsonValue::as_str) {
                    texts.push(text.to_string());
                }
            }
            Some("tool_use") => {
                let arguments = block
                    .get("input")
                    .map(|input| input.to_string())
                    .unwrap_or_else(|| "{}".to_string());
                tool_calls.push(ToolCall {
                    id: block
                        .get("id")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                    kind: Some("function".to_string()),
                    function: ToolCallFunction {
                        name: block
                            .get("name")
                            .and_then(JsonValue::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments,
                    },
                });
            }
            Some("tool_result") => {
                // Tool results surface as their own `tool` turn.
                output.push(UnifiedChatMessage {
                    role: "tool".to_string(),
                    content: block.get("content").cloned(),
                    tool_call_id: block
                        .get("tool_use_id")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string),
                    ..Default::default()
                });
            }
            _ => texts.push(block.to_string()),
        }
    }

    if !texts.is_empty() || !tool_calls.is_empty() {
        output.push(UnifiedChatMessage {
            role: message.role,
            content: join_nonempty(texts).map(JsonValue::String),
            tool_calls,
            tool_call_id: None,
        });
    }
    output
}

fn map_unified_to_claude_message(message: UnifiedChatMessage) -> Vec<ClaudeMessage> {
    if message.role == "tool" {
        let block = json!({
            "type": "tool_result",
            "tool_use_id": message.tool_call_id,
            "content": message.content.unwrap_or(JsonValue::String(String::new())),
        });
        return vec![ClaudeMessage {
            role: "user".to_string(),
            content: JsonValue::Array(vec![block]),
        }];
    }

    if message.tool_calls.is_empty() {
        let Some(content) = message.content else {
            return Vec::new();
        };
        return vec![ClaudeMessage {
            role: message.role,
            content,
        }];
    }

    let mut blocks = Vec::new();
    if let Some(text) = content_text(message.content.as_ref()) {
        blocks.push(json!({ "type": "text", "text": text }));
    }
    for call in message.tool_calls {
        let input: JsonValue =
            serde_json::from_str(&call.function.arguments).unwrap_or(JsonValue::Object(
                serde_json::Map::new(),
            ));
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id.unwrap_or_default(),
            "name": call.function.name,
            "input": input,
        }));
    }
    vec![ClaudeMessage {
        role: message.role,
        content: JsonValue::Array(blocks),
    }]
}

fn map_responses_input_item(item: &JsonValue) -> Option<UnifiedChatMessage> {
    let role = item.get("role").and_then(JsonValue::as_str)?;
    let content = item.get("content")?;
    let text = match content {
        JsonValue::String(text) => text.clone(),
        JsonValue::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(JsonValue::as_str))
                .collect();
            if texts.is_empty() {
                return None;
            }
            texts.join("\n")
        }
        _ => return None,
    };
    Some(UnifiedChatMessage {
        role: role.to_string(),
        content: Some(JsonValue::String(text)),
        ..Default::default()
    })
}

fn map_responses_tool(tool: &JsonValue) -> Option<UnifiedTool> {
    if tool.get("type").and_then(JsonValue::as_str) != Some("function") {
        return None;
    }
    Some(UnifiedTool {
        name: tool
            .get("name")
            .and_then(JsonValue::as_str)?
            .to_string(),
        description: tool
            .get("description")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        parameters: tool.get("parameters").cloned(),
    })
}

fn to_openai_tools(tools: Vec<UnifiedTool>) -> Option<Vec<ToolDefinition>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .into_iter()
            .map(|tool| ToolDefinition {
                kind: "function".to_string(),
                function: FunctionDefinition {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.parameters,
                },
            })
            .collect(),
    )
}

fn to_claude_tools(tools: Vec<UnifiedTool>) -> Option<Vec<ClaudeTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .into_iter()
            .map(|tool| ClaudeTool {
                name: tool.name,
                description: tool.description,
                input_schema: tool.parameters,
            })
            .collect(),
    )
}

fn responses_tools(tools: Vec<UnifiedTool>) -> Option<Vec<JsonValue>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .into_iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect(),
    )
}
