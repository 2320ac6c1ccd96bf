//! The retry loop: select a candidate, build the outbound request, call
//! upstream, classify the outcome, feed the feedback engine, repeat until a
//! 2xx lands or candidates/time run out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use modelmux_protocol::Proto;
use modelmux_storage::{AssociationRow, ModelRow, NewChatLog, ProviderRow, Store};
use modelmux_transform::request::transform_request_with_model;
use modelmux_transform::response::transform_response;
use modelmux_transform::stream::StreamTransformer;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{AttemptFailure, DispatchError};
use crate::feedback::FeedbackEngine;
use crate::introspect::Introspection;
use crate::provider::{ProviderConfig, adapter_for};
use crate::recorder::{LogRecorder, RecordContext};
use crate::selector::{self, Candidate, CandidateSet};
use crate::upstream::{
    Headers, TransportError, UpstreamBody, UpstreamClient, UpstreamHttpResponse,
};
use crate::wire::{FrameReceiver, spawn_stream_pump};

/// Client request facts that ride along for header policy and logging.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub headers: Headers,
    pub user_agent: Option<String>,
    pub remote_ip: Option<String>,
}

pub enum DispatchBody {
    Bytes(Bytes),
    Stream(FrameReceiver),
}

pub struct DispatchOutcome {
    pub log_id: i64,
    pub status: u16,
    pub headers: Headers,
    pub stream: bool,
    pub body: DispatchBody,
}

/// One resolved candidate target.
struct Target {
    provider: ProviderRow,
    config: ProviderConfig,
    proto: Proto,
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    client: Arc<dyn UpstreamClient>,
    feedback: Arc<FeedbackEngine>,
    recorder: LogRecorder,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn UpstreamClient>,
        feedback: Arc<FeedbackEngine>,
    ) -> Self {
        let recorder = LogRecorder::new(store.clone());
        Self {
            store,
            client,
            feedback,
            recorder,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn dispatch(
        &self,
        style: Proto,
        intro: Introspection,
        meta: RequestMeta,
    ) -> Result<DispatchOutcome, DispatchError> {
        let request_started = Instant::now();

        let Some(model) = self.store.model_by_name(&intro.alias).await? else {
            let log = NewChatLog {
                alias: intro.alias.clone(),
                provider_name: String::new(),
                provider_model: String::new(),
                status: "error".to_string(),
                style: style.as_str().to_string(),
                user_agent: meta.user_agent.clone(),
                remote_ip: meta.remote_ip.clone(),
                retry_index: 0,
                error_text: Some("model not found".to_string()),
            };
            if let Err(err) = self.store.insert_chat_log(log).await {
                warn!(event = "chat_log_insert_failed", error = %err);
            }
            return Err(DispatchError::ModelUnknown(intro.alias));
        };

        let settings = self.store.settings().await?;
        let mut associations = self
            .store
            .enabled_associations_for_model(model.id)
            .await?;
        if settings.strict_capability_match {
            associations.retain(|assoc| {
                (!intro.tool_call || assoc.tool_call)
                    && (!intro.structured_output || assoc.structured_output)
                    && (!intro.image || assoc.image)
            });
        }
        if associations.is_empty() {
            return Err(DispatchError::NoCandidates(intro.alias));
        }

        let targets = self.load_targets(&associations).await?;
        let mut candidates: CandidateSet = associations
            .iter()
            .filter(|assoc| targets.contains_key(&assoc.provider_id))
            .map(|assoc| {
                (
                    assoc.id,
                    Candidate {
                        weight: assoc.weight,
                        priority: assoc.priority,
                    },
                )
            })
            .collect();
        if candidates.is_empty() {
            return Err(DispatchError::NoCandidates(intro.alias));
        }
        let assoc_by_id: HashMap<i64, AssociationRow> = associations
            .into_iter()
            .map(|assoc| (assoc.id, assoc))
            .collect();

        let timeout_seconds = model.timeout_seconds.max(1) as u64;
        let deadline = request_started + Duration::from_secs(timeout_seconds);
        let max_retry = model.max_retry.max(1);
        let mut retry_index: i32 = 0;
        let mut last_error: Option<String> = None;
        let mut timed_out = false;

        while !candidates.is_empty() && retry_index < max_retry {
            let now = Instant::now();
            if now >= deadline {
                timed_out = true;
                break;
            }
            let remaining = deadline - now;

            // A fresh thread rng per pick; it must not be held across awaits.
            let Some(id) = selector::pick(&candidates, &mut rand::rng()) else {
                break;
            };
            let assoc = &assoc_by_id[&id];
            let target = &targets[&assoc.provider_id];

            let body = match build_body(style, target.proto, &intro, &assoc.provider_model) {
                Ok(body) => body,
                Err(err) => {
                    let failure = AttemptFailure::Transform(err);
                    self.account_failed_attempt(
                        &model, style, assoc, target, retry_index, &meta, &failure, None,
                    )
                    .await;
                    last_error = Some(failure.describe());
                    candidates.remove(&id);
                    retry_index += 1;
                    continue;
                }
            };

            let adapter = adapter_for(target.proto);
            let mut req = adapter.chat_request(&target.config, body, intro.stream);
            apply_header_policy(&mut req.headers, &meta.headers, assoc, intro.stream);

            let log_id = self
                .store
                .insert_chat_log(NewChatLog {
                    alias: intro.alias.clone(),
                    provider_name: target.provider.name.clone(),
                    provider_model: assoc.provider_model.clone(),
                    // Placeholder; flipped to error on any failure path.
                    status: "success".to_string(),
                    style: style.as_str().to_string(),
                    user_agent: meta.user_agent.clone(),
                    remote_ip: meta.remote_ip.clone(),
                    retry_index,
                    error_text: None,
                })
                .await?;

            let outcome =
                tokio::time::timeout(remaining, self.client.send(req, target.provider.proxy.clone()))
                    .await;

            let failure = match outcome {
                Err(_) => {
                    timed_out = true;
                    AttemptFailure::Transport(TransportError::Timeout(format!(
                        "wall clock expired after {timeout_seconds}s"
                    )))
                }
                Ok(Err(err)) => AttemptFailure::Transport(err),
                Ok(Ok(resp)) if resp.status == 429 => AttemptFailure::RateLimited {
                    body: body_excerpt(resp.body),
                },
                Ok(Ok(resp)) if !resp.is_success() => AttemptFailure::Upstream {
                    status: resp.status,
                    body: body_excerpt(resp.body),
                },
                Ok(Ok(resp)) => {
                    let proxy_time_ms = request_started.elapsed().as_millis() as i64;
                    match self.finish_success(
                        resp,
                        style,
                        target.proto,
                        &model,
                        &intro,
                        log_id,
                        proxy_time_ms,
                        request_started,
                    ) {
                        Ok(outcome) => {
                            info!(
                                event = "dispatch_succeeded",
                                alias = %intro.alias,
                                provider = %target.provider.name,
                                provider_model = %assoc.provider_model,
                                retry_index,
                                stream = intro.stream,
                                proxy_time_ms,
                            );
                            self.feedback.spawn_success(id);
                            return Ok(outcome);
                        }
                        Err(err) => AttemptFailure::Transform(err),
                    }
                }
            };

            self.account_failed_attempt(
                &model,
                style,
                assoc,
                target,
                retry_index,
                &meta,
                &failure,
                Some(log_id),
            )
            .await;
            last_error = Some(failure.describe());

            match &failure {
                AttemptFailure::RateLimited { .. } => {
                    if let Some(candidate) = candidates.get_mut(&id) {
                        selector::penalize_rate_limited(candidate);
                    }
                }
                _ => {
                    candidates.remove(&id);
                }
            }
            retry_index += 1;

            if timed_out {
                break;
            }
        }

        if timed_out || Instant::now() >= deadline {
            return Err(DispatchError::Timeout(timeout_seconds));
        }
        Err(DispatchError::NoProviderSucceeded(
            last_error.unwrap_or_else(|| "no candidate available".to_string()),
        ))
    }

    async fn load_targets(
        &self,
        associations: &[AssociationRow],
    ) -> Result<HashMap<i64, Target>, DispatchError> {
        let mut targets = HashMap::new();
        for assoc in associations {
            if targets.contains_key(&assoc.provider_id) {
                continue;
            }
            let Some(provider) = self.store.provider_by_id(assoc.provider_id).await? else {
                warn!(event = "provider_missing", provider_id = assoc.provider_id);
                continue;
            };
            let Some(proto) = Proto::parse(&provider.ptype) else {
                warn!(event = "provider_type_unknown", provider = %provider.name, ptype = %provider.ptype);
                continue;
            };
            let Some(config) = ProviderConfig::from_json(&provider.config) else {
                warn!(event = "provider_config_invalid", provider = %provider.name);
                continue;
            };
            targets.insert(
                assoc.provider_id,
                Target {
                    provider,
                    config,
                    proto,
                },
            );
        }
        Ok(targets)
    }

    #[allow(clippy::too_many_arguments)]
    async fn account_failed_attempt(
        &self,
        model: &ModelRow,
        style: Proto,
        assoc: &AssociationRow,
        target: &Target,
        retry_index: i32,
        meta: &RequestMeta,
        failure: &AttemptFailure,
        log_id: Option<i64>,
    ) {
        let error_text = failure.describe();
        warn!(
            event = "dispatch_attempt_failed",
            alias = %model.name,
            provider = %target.provider.name,
            provider_model = %assoc.provider_model,
            retry_index,
            error = %error_text,
        );

        match log_id {
            Some(log_id) => {
                if let Err(err) = self.store.mark_chat_log_error(log_id, &error_text).await {
                    warn!(event = "chat_log_update_failed", chat_log_id = log_id, error = %err);
                }
            }
            // Failures before the placeholder row (transform errors) still
            // account their attempt.
            None => {
                let log = NewChatLog {
                    alias: model.name.clone(),
                    provider_name: target.provider.name.clone(),
                    provider_model: assoc.provider_model.clone(),
                    status: "error".to_string(),
                    style: style.as_str().to_string(),
                    user_agent: meta.user_agent.clone(),
                    remote_ip: meta.remote_ip.clone(),
                    retry_index,
                    error_text: Some(error_text),
                };
                if let Err(err) = self.store.insert_chat_log(log).await {
                    warn!(event = "chat_log_insert_failed", error = %err);
                }
            }
        }

        self.feedback
            .spawn_failure(target.provider.name.clone(), assoc.provider_model.clone());
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_success(
        &self,
        resp: UpstreamHttpResponse,
        style: Proto,
        provider_proto: Proto,
        model: &ModelRow,
        intro: &Introspection,
        log_id: i64,
        proxy_time_ms: i64,
        request_started: Instant,
    ) -> Result<DispatchOutcome, modelmux_transform::TransformError> {
        let ctx = RecordContext {
            chat_log_id: log_id,
            style,
            io_log: model.io_log,
            input: intro.raw.clone(),
            proxy_time_ms,
            request_started: request_started.into_std(),
        };

        match resp.body {
            UpstreamBody::Bytes(bytes) => {
                let body = if style == provider_proto {
                    bytes
                } else {
                    Bytes::from(transform_response(provider_proto, style, &bytes)?)
                };
                self.recorder.spawn_body(ctx, body.clone());
                Ok(DispatchOutcome {
                    log_id,
                    status: resp.status,
                    headers: resp.headers,
                    stream: false,
                    body: DispatchBody::Bytes(body),
                })
            }
            UpstreamBody::Stream(upstream) => {
                let transformer = if style == provider_proto {
                    None
                } else {
                    let chunk_id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
                    let created = OffsetDateTime::now_utc().unix_timestamp();
                    Some(StreamTransformer::new(
                        provider_proto,
                        style,
                        &chunk_id,
                        created,
                    ))
                };

                let (client_tx, client_rx) = mpsc::channel(32);
                let (recorder_tx, recorder_rx) = mpsc::channel(32);
                spawn_stream_pump(upstream, transformer, client_tx, recorder_tx);
                self.recorder.spawn_stream(ctx, recorder_rx);

                Ok(DispatchOutcome {
                    log_id,
                    status: resp.status,
                    headers: resp.headers,
                    stream: true,
                    body: DispatchBody::Stream(client_rx),
                })
            }
        }
    }
}

/// Pass-through keeps every byte except the model alias, which always
/// becomes the association's upstream model string.
fn build_body(
    style: Proto,
    provider_proto: Proto,
    intro: &Introspection,
    provider_model: &str,
) -> Result<Bytes, modelmux_transform::TransformError> {
    if style == provider_proto {
        return Ok(swap_model(&intro.raw, provider_model));
    }
    transform_request_with_model(style, provider_proto, &intro.raw, provider_model)
        .map(Bytes::from)
}

fn swap_model(raw: &Bytes, provider_model: &str) -> Bytes {
    let Ok(mut value) = serde_json::from_slice::<JsonValue>(raw) else {
        return raw.clone();
    };
    if value.get("model").and_then(JsonValue::as_str) == Some(provider_model) {
        return raw.clone();
    }
    value["model"] = JsonValue::String(provider_model.to_string());
    match serde_json::to_vec(&value) {
        Ok(bytes) => Bytes::from(bytes),
        Err(_) => raw.clone(),
    }
}

/// Outbound header policy: client auth never leaks upstream; the
/// association may clone the remaining client headers and always overlays
/// its own.
fn apply_header_policy(
    headers: &mut Headers,
    client_headers: &Headers,
    assoc: &AssociationRow,
    stream: bool,
) {
    const STRIPPED: &[&str] = &[
        "authorization",
        "x-api-key",
        "host",
        "content-length",
        "connection",
        "accept-encoding",
    ];

    if assoc.with_header {
        for (key, value) in client_headers {
            let lower = key.to_ascii_lowercase();
            if STRIPPED.contains(&lower.as_str()) {
                continue;
            }
            if headers.iter().any(|(existing, _)| existing.eq_ignore_ascii_case(&lower)) {
                continue;
            }
            headers.push((lower, value.clone()));
        }
    }

    for (key, value) in &assoc.customer_headers {
        let lower = key.to_ascii_lowercase();
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&lower));
        headers.push((lower, value.clone()));
    }

    if stream {
        headers.push(("x-accel-buffering".to_string(), "no".to_string()));
    }
}

fn body_excerpt(body: UpstreamBody) -> String {
    match body {
        UpstreamBody::Bytes(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            text.chars().take(2048).collect()
        }
        UpstreamBody::Stream(_) => "<stream>".to_string(),
    }
}
