pub mod claude;
pub mod openai;
pub mod responses;
pub mod sse;

use serde::{Deserialize, Serialize};

/// Wire protocol spoken on one side of the gateway.
///
/// The same enum describes both the client-facing request style and the
/// provider type stored on a provider row; dispatch compares the two to pick
/// pass-through or transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Proto {
    #[serde(rename = "openai")]
    OpenAiChat,
    #[serde(rename = "openai-res")]
    OpenAiResponses,
    #[serde(rename = "anthropic")]
    Claude,
}

impl Proto {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::OpenAiChat => "openai",
            Proto::OpenAiResponses => "openai-res",
            Proto::Claude => "anthropic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(Proto::OpenAiChat),
            "openai-res" => Some(Proto::OpenAiResponses),
            "anthropic" => Some(Proto::Claude),
            _ => None,
        }
    }
}

impl std::fmt::Display for Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
