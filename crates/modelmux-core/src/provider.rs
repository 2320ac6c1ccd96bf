//! Per-upstream-type request builders.
//!
//! Each provider type knows how to turn a canonical payload into an outbound
//! HTTP request: endpoint path, auth header placement, protocol version
//! headers. Everything else about an attempt (retry, transform, logging) is
//! provider-agnostic.

use bytes::Bytes;
use modelmux_protocol::Proto;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::upstream::{Headers, HttpMethod, UpstreamHttpRequest};

pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Type-specific JSON stored on the provider row.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    /// anthropic only; defaults to [`DEFAULT_ANTHROPIC_VERSION`].
    #[serde(default)]
    pub version: Option<String>,
    /// anthropic only.
    #[serde(default)]
    pub beta: Option<String>,
}

impl ProviderConfig {
    pub fn from_json(config: &JsonValue) -> Option<Self> {
        serde_json::from_value(config.clone()).ok()
    }
}

pub trait ProviderAdapter: Send + Sync {
    fn proto(&self) -> Proto;

    /// Chat-dispatch request carrying the already-converted body.
    fn chat_request(&self, config: &ProviderConfig, body: Bytes, stream: bool)
    -> UpstreamHttpRequest;

    /// Upstream model listing.
    fn models_request(&self, config: &ProviderConfig) -> UpstreamHttpRequest;
}

pub fn adapter_for(proto: Proto) -> &'static dyn ProviderAdapter {
    match proto {
        Proto::OpenAiChat => &OpenAiAdapter,
        Proto::OpenAiResponses => &OpenAiResponsesAdapter,
        Proto::Claude => &AnthropicAdapter,
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn json_headers() -> Headers {
    vec![("content-type".to_string(), "application/json".to_string())]
}

pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn proto(&self) -> Proto {
        Proto::OpenAiChat
    }

    fn chat_request(
        &self,
        config: &ProviderConfig,
        body: Bytes,
        stream: bool,
    ) -> UpstreamHttpRequest {
        let mut headers = json_headers();
        headers.push((
            "authorization".to_string(),
            format!("Bearer {}", config.api_key),
        ));
        UpstreamHttpRequest {
            method: HttpMethod::Post,
            url: join_url(&config.base_url, "chat/completions"),
            headers,
            body: Some(body),
            is_stream: stream,
        }
    }

    fn models_request(&self, config: &ProviderConfig) -> UpstreamHttpRequest {
        UpstreamHttpRequest {
            method: HttpMethod::Get,
            url: join_url(&config.base_url, "models"),
            headers: vec![(
                "authorization".to_string(),
                format!("Bearer {}", config.api_key),
            )],
            body: None,
            is_stream: false,
        }
    }
}

pub struct OpenAiResponsesAdapter;

impl ProviderAdapter for OpenAiResponsesAdapter {
    fn proto(&self) -> Proto {
        Proto::OpenAiResponses
    }

    fn chat_request(
        &self,
        config: &ProviderConfig,
        body: Bytes,
        stream: bool,
    ) -> UpstreamHttpRequest {
        let mut headers = json_headers();
        headers.push((
            "authorization".to_string(),
            format!("Bearer {}", config.api_key),
        ));
        UpstreamHttpRequest {
            method: HttpMethod::Post,
            url: join_url(&config.base_url, "responses"),
            headers,
            body: Some(body),
            is_stream: stream,
        }
    }

    fn models_request(&self, config: &ProviderConfig) -> UpstreamHttpRequest {
        UpstreamHttpRequest {
            method: HttpMethod::Get,
            url: join_url(&config.base_url, "models"),
            headers: vec![(
                "authorization".to_string(),
                format!("Bearer {}", config.api_key),
            )],
            body: None,
            is_stream: false,
        }
    }
}

pub struct AnthropicAdapter;

impl AnthropicAdapter {
    fn auth_headers(config: &ProviderConfig) -> Headers {
        let mut headers = vec![
            ("x-api-key".to_string(), config.api_key.clone()),
            (
                "anthropic-version".to_string(),
                config
                    .version
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ANTHROPIC_VERSION.to_string()),
            ),
        ];
        if let Some(beta) = &config.beta {
            headers.push(("anthropic-beta".to_string(), beta.clone()));
        }
        headers
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn proto(&self) -> Proto {
        Proto::Claude
    }

    fn chat_request(
        &self,
        config: &ProviderConfig,
        body: Bytes,
        stream: bool,
    ) -> UpstreamHttpRequest {
        let mut headers = json_headers();
        headers.extend(Self::auth_headers(config));
        UpstreamHttpRequest {
            method: HttpMethod::Post,
            url: join_url(&config.base_url, "messages"),
            headers,
            body: Some(body),
            is_stream: stream,
        }
    }

    fn models_request(&self, config: &ProviderConfig) -> UpstreamHttpRequest {
        UpstreamHttpRequest {
            method: HttpMethod::Get,
            url: join_url(&config.base_url, "models"),
            headers: Self::auth_headers(config),
            body: None,
            is_stream: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anthropic_headers_carry_version_and_beta() {
        let config = ProviderConfig::from_json(&json!({
            "base_url": "https://api.anthropic.com/v1/",
            "api_key": "sk-test",
            "version": "2024-01-01",
            "beta": "tools-2024"
        }))
        .unwrap();
        let req = AnthropicAdapter.chat_request(&config, Bytes::from_static(b"{}"), true);
        assert_eq!(req.url, "https://api.anthropic.com/v1/messages");
        assert!(req.headers.contains(&("x-api-key".to_string(), "sk-test".to_string())));
        assert!(
            req.headers
                .contains(&("anthropic-version".to_string(), "2024-01-01".to_string()))
        );
        assert!(
            req.headers
                .contains(&("anthropic-beta".to_string(), "tools-2024".to_string()))
        );
        assert!(req.is_stream);
    }

    #[test]
    fn openai_bearer_auth_and_path() {
        let config = ProviderConfig::from_json(&json!({
            "base_url": "https://api.openai.com/v1",
            "api_key": "sk-x"
        }))
        .unwrap();
        let req = OpenAiAdapter.chat_request(&config, Bytes::from_static(b"{}"), false);
        assert_eq!(req.url, "https://api.openai.com/v1/chat/completions");
        assert!(
            req.headers
                .contains(&("authorization".to_string(), "Bearer sk-x".to_string()))
        );
    }

    #[test]
    fn model_listing_targets_each_protocol() {
        let config = ProviderConfig::from_json(&json!({
            "base_url": "https://api.example.com/v1",
            "api_key": "k"
        }))
        .unwrap();
        for proto in [Proto::OpenAiChat, Proto::OpenAiResponses, Proto::Claude] {
            let req = adapter_for(proto).models_request(&config);
            assert_eq!(req.method, HttpMethod::Get);
            assert_eq!(req.url, "https://api.example.com/v1/models");
            assert!(req.body.is_none());
        }
    }
}
