use modelmux_storage::StoreError;
use modelmux_transform::TransformError;

use crate::upstream::TransportError;

/// Errors that surface to the client. Internal attempt failures are
/// [`AttemptFailure`] and stay inside the retry loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown model: {0}")]
    ModelUnknown(String),
    #[error("no enabled candidate for model: {0}")]
    NoCandidates(String),
    #[error("dispatch timed out after {0}s")]
    Timeout(u64),
    #[error("all providers failed: {0}")]
    NoProviderSucceeded(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::InvalidRequest(_) => "invalid_request",
            DispatchError::ModelUnknown(_) => "model_unknown",
            DispatchError::NoCandidates(_) => "no_candidates",
            DispatchError::Timeout(_) => "timeout",
            DispatchError::NoProviderSucceeded(_) => "no_provider_succeeded",
            DispatchError::Store(_) => "internal",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            DispatchError::InvalidRequest(_) => 400,
            _ => 500,
        }
    }
}

/// One failed upstream attempt, classified for the retry loop.
#[derive(Debug)]
pub enum AttemptFailure {
    /// No HTTP response (unreachable, TLS, DNS, reset) or the attempt was
    /// cancelled; the candidate is removed.
    Transport(TransportError),
    /// Upstream 429; the candidate keeps its slot with a weight penalty.
    RateLimited { body: String },
    /// Upstream non-2xx other than 429; the candidate is removed.
    Upstream { status: u16, body: String },
    /// Wire-format conversion failed; the candidate is removed.
    Transform(TransformError),
}

impl AttemptFailure {
    pub fn describe(&self) -> String {
        match self {
            AttemptFailure::Transport(err) => format!("transport: {err}"),
            AttemptFailure::RateLimited { body } => format!("upstream 429: {body}"),
            AttemptFailure::Upstream { status, body } => format!("upstream {status}: {body}"),
            AttemptFailure::Transform(err) => format!("transform: {err}"),
        }
    }
}
