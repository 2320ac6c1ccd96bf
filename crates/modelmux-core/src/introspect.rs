//! One-shot parse of the inbound client payload.
//!
//! The raw bytes are kept alongside the extracted routing facts; the only
//! mutation ever applied here is the `stream_options.include_usage`
//! injection for streaming OpenAI-chat requests, so pass-through fidelity
//! holds for every other field.

use bytes::Bytes;
use modelmux_protocol::Proto;
use serde_json::{Value as JsonValue, json};

use crate::error::DispatchError;

#[derive(Debug, Clone)]
pub struct Introspection {
    pub alias: String,
    pub stream: bool,
    pub tool_call: bool,
    pub structured_output: bool,
    pub image: bool,
    pub raw: Bytes,
}

pub fn introspect(style: Proto, raw: &[u8]) -> Result<Introspection, DispatchError> {
    let mut value: JsonValue = serde_json::from_slice(raw)
        .map_err(|err| DispatchError::InvalidRequest(format!("malformed json: {err}")))?;

    let alias = value
        .get("model")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .filter(|alias| !alias.is_empty())
        .ok_or_else(|| DispatchError::InvalidRequest("missing model".to_string()))?;

    let stream = value
        .get("stream")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    let tool_call = value
        .get("tools")
        .and_then(JsonValue::as_array)
        .is_some_and(|tools| !tools.is_empty());

    let (structured_output, image) = match style {
        Proto::OpenAiChat => {
            let structured = value.get("response_format").is_some();
            let image = messages_have_part(&value, "messages", "user", "image_url");
            if stream {
                // Usage must be reported on every streamed response.
                value["stream_options"] = json!({ "include_usage": true });
            }
            (structured, image)
        }
        Proto::OpenAiResponses => {
            let structured = value
                .pointer("/text/format/type")
                .and_then(JsonValue::as_str)
                == Some("json_schema");
            let image = messages_have_part(&value, "input", "user", "input_image");
            (structured, image)
        }
        // Anthropic couples structured output to tool use upstream.
        Proto::Claude => {
            let image = messages_have_part(&value, "messages", "user", "image");
            (tool_call, image)
        }
    };

    let raw = if matches!(style, Proto::OpenAiChat) && stream {
        Bytes::from(serde_json::to_vec(&value).map_err(|err| {
            DispatchError::InvalidRequest(format!("re-encode failed: {err}"))
        })?)
    } else {
        Bytes::copy_from_slice(raw)
    };

    Ok(Introspection {
        alias,
        stream,
        tool_call,
        structured_output,
        image,
        raw,
    })
}

fn messages_have_part(value: &JsonValue, list_key: &str, role: &str, part_type: &str) -> bool {
    let Some(messages) = value.get(list_key).and_then(JsonValue::as_array) else {
        return false;
    };
    messages.iter().any(|message| {
        if message.get("role").and_then(JsonValue::as_str) != Some(role) {
            return false;
        }
        message
            .get("content")
            .and_then(JsonValue::as_array)
            .is_some_and(|parts| {
                parts.iter().any(|part| {
                    part.get("type").and_then(JsonValue::as_str) == Some(part_type)
                })
            })
    })
}
