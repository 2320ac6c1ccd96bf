//! Request-body conversion entry point.

use modelmux_protocol::Proto;

use crate::TransformError;
use crate::unified::{
    UnifiedMessage, claude_to_unified, openai_to_unified, responses_to_unified, unified_to_claude,
    unified_to_openai, unified_to_responses,
};

/// Convert a request body from the client's wire format to the provider's.
///
/// Callers must take the pass-through path when `src == dst`; conversion is
/// lossy by design for fields the unified form does not model.
pub fn transform_request(src: Proto, dst: Proto, raw: &[u8]) -> Result<Vec<u8>, TransformError> {
    let unified = decode(src, raw)?;
    encode(dst, unified)
}

/// Rewrite the upstream model name on an already-converted body.
pub fn transform_request_with_model(
    src: Proto,
    dst: Proto,
    raw: &[u8],
    provider_model: &str,
) -> Result<Vec<u8>, TransformError> {
    let mut unified = decode(src, raw)?;
    unified.model = provider_model.to_string();
    encode(dst, unified)
}

fn decode(src: Proto, raw: &[u8]) -> Result<UnifiedMessage, TransformError> {
    match src {
        Proto::OpenAiChat => serde_json::from_slice(raw)
            .map(openai_to_unified)
            .map_err(|err| TransformError::decode(src, err)),
        Proto::OpenAiResponses => serde_json::from_slice(raw)
            .map(responses_to_unified)
            .map_err(|err| TransformError::decode(src, err)),
        Proto::Claude => serde_json::from_slice(raw)
            .map(claude_to_unified)
            .map_err(|err| TransformError::decode(src, err)),
    }
}

fn encode(dst: Proto, unified: UnifiedMessage) -> Result<Vec<u8>, TransformError> {
    match dst {
        Proto::OpenAiChat => serde_json::to_vec(&unified_to_openai(unified))
            .map_err(|err| TransformError::encode(dst, err)),
        Proto::OpenAiResponses => serde_json::to_vec(&unified_to_responses(unified))
            .map_err(|err| TransformError::encode(dst, err)),
        Proto::Claude => serde_json::to_vec(&unified_to_claude(unified))
            .map_err(|err| TransformError::encode(dst, err)),
    }
}
