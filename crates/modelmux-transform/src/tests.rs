use modelmux_protocol::Proto;
use modelmux_protocol::openai::ChatCompletionRequest;
use modelmux_protocol::sse::{SseEvent, SseParser};
use serde_json::{Value as JsonValue, json};

use crate::request::transform_request;
use crate::stream::StreamTransformer;
use crate::unified::{openai_to_unified, unified_to_openai};

fn openai_request(value: JsonValue) -> ChatCompletionRequest {
    serde_json::from_value(value).unwrap()
}

#[test]
fn openai_round_trip_is_semantically_idempotent() {
    let original = openai_request(json!({
        "model": "gpt-4o",
        "stream": true,
        "temperature": 0.2,
        "top_p": 0.9,
        "max_tokens": 256,
        "messages": [
            { "role": "system", "content": "be brief" },
            { "role": "user", "content": "hi" },
            {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "lookup", "arguments": "{\"q\":1}" }
                }]
            },
            { "role": "tool", "tool_call_id": "call_1", "content": "42" }
        ],
        "tools": [{
            "type": "function",
            "function": { "name": "lookup", "description": "d", "parameters": { "type": "object" } }
        }]
    }));

    let round = unified_to_openai(openai_to_unified(original.clone()));

    assert_eq!(round.model, original.model);
    assert_eq!(round.stream, Some(true));
    assert_eq!(round.temperature, original.temperature);
    assert_eq!(round.top_p, original.top_p);
    assert_eq!(round.max_tokens, original.max_tokens);
    // System text survives as the leading message.
    assert_eq!(round.messages[0].role, "system");
    assert_eq!(
        round.messages[0].content,
        Some(JsonValue::String("be brief".to_string()))
    );
    let assistant = &round.messages[2];
    let calls = assistant.tool_calls.as_ref().unwrap();
    assert_eq!(calls[0].id.as_deref(), Some("call_1"));
    assert_eq!(calls[0].function.name, "lookup");
    let tool = &round.messages[3];
    assert_eq!(tool.role, "tool");
    assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
    // Streaming requests always ask for usage.
    assert!(round.stream_options.unwrap().include_usage);
}

#[test]
fn system_only_request_keeps_messages_in_place() {
    let request = openai_request(json!({
        "model": "gpt-4o",
        "messages": [{ "role": "system", "content": "only system" }]
    }));
    let unified = openai_to_unified(request);
    assert!(unified.system.is_none());
    assert_eq!(unified.messages.len(), 1);
    assert_eq!(unified.messages[0].role, "system");
}

#[test]
fn openai_to_claude_applies_max_tokens_default() {
    let raw = json!({
        "model": "gpt-4o",
        "messages": [{ "role": "user", "content": "hi" }]
    })
    .to_string();
    let out = transform_request(Proto::OpenAiChat, Proto::Claude, raw.as_bytes()).unwrap();
    let claude: JsonValue = serde_json::from_slice(&out).unwrap();
    assert_eq!(claude["max_tokens"], json!(4096));
    assert_eq!(claude["messages"][0]["role"], "user");
}

#[test]
fn claude_tool_use_becomes_tool_calls() {
    let raw = json!({
        "model": "claude-x",
        "max_tokens": 100,
        "system": "sys",
        "messages": [
            { "role": "user", "content": "run it" },
            { "role": "assistant", "content": [
                { "type": "text", "text": "running" },
                { "type": "tool_use", "id": "tu_1", "name": "run", "input": { "a": 1 } }
            ]},
            { "role": "user", "content": [
                { "type": "tool_result", "tool_use_id": "tu_1", "content": "done" }
            ]}
        ],
        "tools": [{ "name": "run", "description": "d", "input_schema": { "type": "object" } }]
    })
    .to_string();

    let out = transform_request(Proto::Claude, Proto::OpenAiChat, raw.as_bytes()).unwrap();
    let openai: JsonValue = serde_json::from_slice(&out).unwrap();

    assert_eq!(openai["messages"][0]["role"], "system");
    let assistant = &openai["messages"][2];
    assert_eq!(assistant["tool_calls"][0]["id"], "tu_1");
    assert_eq!(assistant["tool_calls"][0]["function"]["name"], "run");
    assert_eq!(
        assistant["tool_calls"][0]["function"]["arguments"],
        json!("{\"a\":1}")
    );
    let tool = &openai["messages"][3];
    assert_eq!(tool["role"], "tool");
    assert_eq!(tool["tool_call_id"], "tu_1");
    assert_eq!(openai["tools"][0]["function"]["parameters"]["type"], "object");
}

fn drive(transformer: &mut StreamTransformer, input: &str) -> Vec<String> {
    let mut parser = SseParser::new();
    let mut frames = Vec::new();
    for event in parser.push_str(input).unwrap() {
        frames.extend(transformer.push(&event).expect("chunk decodes"));
    }
    for event in parser.finish() {
        frames.extend(transformer.push(&event).expect("chunk decodes"));
    }
    frames
}

#[test]
fn claude_stream_to_openai_fixture() {
    let input = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"m1\",\"model\":\"claude\"}}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"hello\"}}\n",
        "\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"input_tokens\":5,\"output_tokens\":1}}\n",
        "\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n",
        "\n",
    );

    let mut transformer = StreamTransformer::new(Proto::Claude, Proto::OpenAiChat, "c1", 1);
    let frames = drive(&mut transformer, input);
    assert_eq!(frames.len(), 3);

    let first: JsonValue =
        serde_json::from_str(frames[0].trim_start_matches("data: ").trim()).unwrap();
    assert_eq!(first["choices"][0]["delta"]["content"], "hello");

    let second: JsonValue =
        serde_json::from_str(frames[1].trim_start_matches("data: ").trim()).unwrap();
    assert_eq!(second["choices"][0]["finish_reason"], "stop");
    assert_eq!(second["usage"]["prompt_tokens"], 5);
    assert_eq!(second["usage"]["completion_tokens"], 1);
    assert_eq!(second["usage"]["total_tokens"], 6);

    assert_eq!(frames[2], "data: [DONE]\n\n");
}

#[test]
fn claude_tool_call_stream_maps_incrementally() {
    let input = concat!(
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_9\",\"name\":\"run\"}}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"a\\\":\"}}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"1}\"}}\n",
        "\n",
    );

    let mut transformer = StreamTransformer::new(Proto::Claude, Proto::OpenAiChat, "c1", 1);
    let frames = drive(&mut transformer, input);
    assert_eq!(frames.len(), 3);

    let start: JsonValue =
        serde_json::from_str(frames[0].trim_start_matches("data: ").trim()).unwrap();
    assert_eq!(start["choices"][0]["delta"]["role"], "assistant");
    let call = &start["choices"][0]["delta"]["tool_calls"][0];
    assert_eq!(call["index"], 1);
    assert_eq!(call["id"], "tu_9");
    assert_eq!(call["function"]["name"], "run");
    assert_eq!(call["function"]["arguments"], "");

    let delta: JsonValue =
        serde_json::from_str(frames[1].trim_start_matches("data: ").trim()).unwrap();
    assert_eq!(
        delta["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"],
        "{\"a\":"
    );
}

#[test]
fn openai_stream_to_claude_emits_full_envelope() {
    let input = concat!(
        "data: {\"id\":\"cc1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"hi\"}}]}\n",
        "\n",
        "data: {\"id\":\"cc1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n",
        "\n",
        "data: [DONE]\n",
        "\n",
    );

    let mut transformer = StreamTransformer::new(Proto::OpenAiChat, Proto::Claude, "c1", 1);
    let frames = drive(&mut transformer, input);
    let joined = frames.join("");

    let start_pos = joined.find("event: message_start").unwrap();
    let delta_pos = joined.find("text_delta").unwrap();
    let stop_pos = joined.find("event: message_stop").unwrap();
    assert!(start_pos < delta_pos && delta_pos < stop_pos);
    assert!(joined.contains("\"stop_reason\":\"tool_use\""));
    assert!(joined.contains("\"input_tokens\":3"));
    assert!(joined.contains("\"output_tokens\":2"));
    // message_stop is emitted exactly once even though [DONE] follows.
    assert_eq!(joined.matches("event: message_stop").count(), 1);
}

#[test]
fn responses_stream_forwards_text_deltas_only() {
    let input = concat!(
        "event: response.created\n",
        "data: {\"type\":\"response.created\",\"response\":{\"id\":\"r1\"}}\n",
        "\n",
        "event: response.output_text.delta\n",
        "data: {\"type\":\"response.output_text.delta\",\"delta\":\"par\"}\n",
        "\n",
        "event: response.completed\n",
        "data: {\"type\":\"response.completed\",\"response\":{\"id\":\"r1\",\"usage\":{\"input_tokens\":7,\"output_tokens\":4,\"total_tokens\":11}}}\n",
        "\n",
    );

    let mut transformer =
        StreamTransformer::new(Proto::OpenAiResponses, Proto::OpenAiChat, "c1", 1);
    let frames = drive(&mut transformer, input);
    assert_eq!(frames.len(), 3);

    let text: JsonValue =
        serde_json::from_str(frames[0].trim_start_matches("data: ").trim()).unwrap();
    assert_eq!(text["choices"][0]["delta"]["content"], "par");

    let terminal: JsonValue =
        serde_json::from_str(frames[1].trim_start_matches("data: ").trim()).unwrap();
    assert_eq!(terminal["choices"][0]["finish_reason"], "stop");
    assert_eq!(terminal["usage"]["prompt_tokens"], 7);
    assert_eq!(frames[2], "data: [DONE]\n\n");
}

#[test]
fn passthrough_preserves_event_names() {
    let mut transformer = StreamTransformer::new(Proto::Claude, Proto::Claude, "c1", 1);
    let frames = transformer
        .push(&SseEvent {
            event: Some("ping".to_string()),
            data: "{\"type\":\"ping\"}".to_string(),
        })
        .unwrap();
    assert_eq!(frames, vec!["event: ping\ndata: {\"type\":\"ping\"}\n\n".to_string()]);
}

#[test]
fn undecodable_chunk_is_reported_and_stream_continues() {
    let mut transformer = StreamTransformer::new(Proto::Claude, Proto::OpenAiChat, "c1", 1);

    let failure = transformer
        .push(&SseEvent {
            event: Some("content_block_delta".to_string()),
            data: "{not json".to_string(),
        })
        .unwrap_err();
    assert_eq!(failure.event.as_deref(), Some("content_block_delta"));

    // The bad chunk is skipped, not fatal: later events still map.
    let frames = transformer
        .push(&SseEvent {
            event: Some("content_block_delta".to_string()),
            data: json!({
                "type": "content_block_delta",
                "delta": { "type": "text_delta", "text": "still here" }
            })
            .to_string(),
        })
        .unwrap();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].contains("still here"));
}
