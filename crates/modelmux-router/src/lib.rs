//! Inbound HTTP surface of the gateway.
//!
//! Four routes, one shared bearer token, and the streaming response
//! assembly. Admin CRUD lives elsewhere; this router only fronts dispatch.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use modelmux_core::dispatch::{DispatchBody, DispatchOutcome, RequestMeta};
use modelmux_core::error::DispatchError;
use modelmux_core::introspect::introspect;
use modelmux_core::state::AppState;
use modelmux_core::upstream::Headers;
use modelmux_protocol::Proto;

pub fn gateway_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/responses", post(openai_responses))
        .route("/v1/messages", post(anthropic_messages))
        .layer(middleware::from_fn_with_state(state.clone(), bearer_auth))
        .with_state(state)
}

/// Shared-token auth. `Authorization: Bearer` everywhere; `/v1/messages`
/// also accepts `x-api-key`. No configured token means open mode.
async fn bearer_auth(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(token) = state.token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    let api_key = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim);

    let allow_api_key = req.uri().path() == "/v1/messages";
    let authorized = bearer == Some(token) || (allow_api_key && api_key == Some(token));
    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[derive(Serialize)]
struct ModelEntry {
    id: String,
    object: &'static str,
    created: i64,
    owned_by: &'static str,
}

async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    let models = match state.store.list_models().await {
        Ok(models) => models,
        Err(err) => {
            return error_json(500, "internal", &err.to_string());
        }
    };
    let created = time::OffsetDateTime::now_utc().unix_timestamp();
    let data: Vec<ModelEntry> = models
        .into_iter()
        .map(|model| ModelEntry {
            id: model.name,
            object: "model",
            created,
            owned_by: "modelmux",
        })
        .collect();
    axum::Json(json!({ "object": "list", "data": data })).into_response()
}

async fn openai_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_dispatch(state, Proto::OpenAiChat, headers, body).await
}

async fn openai_responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_dispatch(state, Proto::OpenAiResponses, headers, body).await
}

async fn anthropic_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_dispatch(state, Proto::Claude, headers, body).await
}

async fn handle_dispatch(
    state: Arc<AppState>,
    style: Proto,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let intro = match introspect(style, &body) {
        Ok(intro) => intro,
        Err(err) => return dispatch_error(err),
    };
    let alias = intro.alias.clone();
    let stream = intro.stream;
    let meta = RequestMeta {
        headers: headers_to_vec(&headers),
        user_agent: header_str(&headers, header::USER_AGENT.as_str()),
        remote_ip: header_str(&headers, "x-forwarded-for")
            .map(|chain| chain.split(',').next().unwrap_or(&chain).trim().to_string()),
    };

    let outcome = match state.dispatcher.dispatch(style, intro, meta).await {
        Ok(outcome) => outcome,
        Err(err) => return dispatch_error(err),
    };

    info!(
        event = "gateway_responded",
        style = %style,
        alias = %alias,
        status = outcome.status,
        stream,
        log_id = outcome.log_id,
        elapsed_ms = started.elapsed().as_millis(),
    );

    let strip = state
        .store
        .settings()
        .await
        .map(|settings| settings.strip_response_headers)
        .unwrap_or(false);
    build_response(outcome, strip)
}

fn build_response(outcome: DispatchOutcome, strip_headers: bool) -> Response {
    let mut resp = match outcome.body {
        DispatchBody::Bytes(bytes) => Response::new(Body::from(bytes)),
        DispatchBody::Stream(rx) => Response::new(Body::from_stream(ReceiverStream::new(rx))),
    };
    *resp.status_mut() = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK);

    forward_headers(resp.headers_mut(), &outcome.headers, strip_headers);

    if outcome.stream {
        let headers = resp.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    }
    resp
}

/// Upstream headers ride through minus hop-by-hop plumbing; the strip
/// setting narrows the forwarded set to the three the clients rely on.
fn forward_headers(target: &mut HeaderMap, upstream: &Headers, strip: bool) {
    const HOP_BY_HOP: &[&str] = &[
        "connection",
        "content-length",
        "content-encoding",
        "transfer-encoding",
        "keep-alive",
    ];
    const ALLOWED_WHEN_STRIPPED: &[&str] = &["content-type", "x-request-id", "x-ratelimit-limit"];

    for (key, value) in upstream {
        let lower = key.to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        if strip && !ALLOWED_WHEN_STRIPPED.contains(&lower.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::from_bytes(lower.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            target.insert(name, value);
        }
    }
}

fn dispatch_error(err: DispatchError) -> Response {
    error_json(err.http_status(), err.code(), &err.to_string())
}

fn error_json(status: u16, code: &str, message: &str) -> Response {
    let mut resp = axum::Json(json!({ "code": code, "message": message })).into_response();
    *resp.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    resp
}

fn headers_to_vec(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(key, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (key.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
