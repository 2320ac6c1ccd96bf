pub mod request;
pub mod response;
pub mod stream;
pub mod unified;

#[cfg(test)]
mod tests;

use modelmux_protocol::Proto;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("malformed {proto} payload: {source}")]
    Decode {
        proto: Proto,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {proto} payload: {source}")]
    Encode {
        proto: Proto,
        #[source]
        source: serde_json::Error,
    },
}

impl TransformError {
    pub fn decode(proto: Proto, source: serde_json::Error) -> Self {
        TransformError::Decode { proto, source }
    }

    pub fn encode(proto: Proto, source: serde_json::Error) -> Self {
        TransformError::Encode { proto, source }
    }
}
