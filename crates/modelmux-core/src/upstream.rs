//! Outbound HTTP plumbing.
//!
//! The dispatcher talks to upstream through the [`UpstreamClient`] trait so
//! tests can stub the wire. The production impl holds one direct `wreq`
//! client plus one per distinct provider proxy URL, since every provider
//! row may carry its own outbound proxy.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use wreq::{Client, Method, Proxy};

pub type Headers = Vec<(String, String)>;
pub type ByteStream = tokio::sync::mpsc::Receiver<Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

impl UpstreamHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// No HTTP response came back. The retry loop drops the candidate either
/// way, so the variants only exist to make log lines and health rows
/// readable; there is no finer-grained handling to feed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("tls failure: {0}")]
    Tls(String),
    #[error("transport failure: {0}")]
    Other(String),
}

pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
        proxy: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, TransportError>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(86400),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let direct = base_builder(&config).build()?;
        Ok(Self {
            config,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    /// Providers without a proxy share the direct client; each distinct
    /// proxy URL gets its own, built on first use and reused after.
    fn client_for(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let Some(proxy) = proxy.map(str::trim).filter(|url| !url.is_empty()) else {
            return Ok(self.direct.clone());
        };

        let mut cache = match self.proxied.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(client) = cache.get(proxy) {
            return Ok(client.clone());
        }

        let route = Proxy::all(proxy)
            .map_err(|err| TransportError::Other(format!("bad proxy url {proxy}: {err}")))?;
        let client = base_builder(&self.config)
            .proxy(route)
            .build()
            .map_err(classify)?;
        cache.insert(proxy.to_string(), client.clone());
        Ok(client)
    }

    async fn read_response(
        &self,
        resp: wreq::Response,
        want_stream: bool,
    ) -> Result<UpstreamHttpResponse, TransportError> {
        let status = resp.status().as_u16();
        let headers = collect_headers(resp.headers());

        // Errors and non-stream replies are buffered whole: the retry loop
        // wants the error body as diagnostics and the recorder wants the
        // success body in one piece.
        let body = if want_stream && (200..300).contains(&status) {
            UpstreamBody::Stream(self.forward_body(resp))
        } else {
            UpstreamBody::Bytes(resp.bytes().await.map_err(classify)?)
        };

        Ok(UpstreamHttpResponse {
            status,
            headers,
            body,
        })
    }

    /// Copy the response body into a channel the pump consumes. An idle
    /// read past the configured window ends the stream rather than pinning
    /// the dispatch open forever.
    fn forward_body(&self, resp: wreq::Response) -> ByteStream {
        let idle = self.config.stream_idle_timeout;
        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
        tokio::spawn(async move {
            let mut body = resp.bytes_stream();
            while let Ok(Some(Ok(chunk))) = tokio::time::timeout(idle, body.next()).await {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
        proxy: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, TransportError>> + Send + 'a>>
    {
        Box::pin(async move {
            let client = self.client_for(proxy.as_deref())?;
            let method = match req.method {
                HttpMethod::Get => Method::GET,
                HttpMethod::Post => Method::POST,
            };

            let mut builder = client.request(method, &req.url);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(classify)?;
            self.read_response(resp, req.is_stream).await
        })
    }
}

fn base_builder(config: &UpstreamClientConfig) -> wreq::ClientBuilder {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .read_timeout(config.stream_idle_timeout)
}

fn collect_headers(map: &wreq::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|text| (name.as_str().to_string(), text.to_string()))
        })
        .collect()
}

fn classify(err: wreq::Error) -> TransportError {
    let message = err.to_string();
    if err.is_timeout() {
        return TransportError::Timeout(message);
    }
    // DNS and handshake problems surface as connect errors; the retry loop
    // treats every flavour as a dead route.
    if err.is_connect() || err.is_connection_reset() {
        return TransportError::Connect(message);
    }
    let lower = message.to_ascii_lowercase();
    if lower.contains("tls") || lower.contains("certificate") {
        return TransportError::Tls(message);
    }
    TransportError::Other(message)
}
