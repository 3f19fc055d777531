//! Error taxonomy shared across the runtime.
//!
//! Each component owns a local error enum; callers compose them with
//! `#[from]` rather than reaching for one monolithic error type.

use bytes::Bytes;
use serde_json::Value;

use crate::headers::HeaderDict;
use crate::retry::RetryError;

/// Decoded response content: JSON when the body parses, raw bytes otherwise.
#[derive(Debug, Clone)]
pub enum ResponseContent {
    Json(Value),
    Bytes(Bytes),
    Empty,
}

impl std::fmt::Display for ResponseContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseContent::Json(v) => write!(f, "{v}"),
            ResponseContent::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            ResponseContent::Empty => write!(f, "<empty>"),
        }
    }
}

/// Invalid caller arguments: contradictory parameters, malformed input.
#[derive(Debug, thiserror::Error)]
pub enum ClientUsageError {
    #[error("both `body` and `post_params` were provided; only one is allowed")]
    ConflictingBody,
    #[error("unsupported content type for form encoding: {0}")]
    UnsupportedFormContentType(String),
    #[error("{0}")]
    InvalidArgument(String),
}

/// Network, TLS, DNS, or timeout failure. Retryable by the Retry Harness.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error(transparent)]
    ClientUsage(#[from] ClientUsageError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("reached maximum number of retries")]
    RetryExhausted {
        #[source]
        caused_by: Box<RetryError<TransportError>>,
    },
}

/// HTTP 4xx/5xx other than 401, or a response that matched no declared
/// `response_types` entry.
#[derive(Debug, thiserror::Error)]
#[error("service returned {status} {reason}: {content}")]
pub struct ServiceError {
    pub status: u16,
    pub reason: String,
    pub content: ResponseContent,
    pub headers: HeaderDict,
}

/// OIDC misconfiguration, ID-token validation failure, refresh failure.
#[derive(Debug, thiserror::Error)]
pub enum AuthFlowError {
    #[error("OIDC discovery response missing required field `{0}`")]
    MissingDiscoveryField(&'static str),
    #[error("OIDC endpoint `{field}` is not under the issuer: {value}")]
    EndpointNotUnderIssuer { field: &'static str, value: String },
    #[error("id token validation failed: {0}")]
    InvalidIdToken(String),
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("device flow expired before authorization completed")]
    DeviceFlowExpired,
    #[error("authorization was denied or the loopback callback timed out: {0}")]
    AuthorizationFailed(String),
}

/// A recoverable chunked-transfer failure. `recover` re-obtains a fresh
/// signed URL; if it returns `false` the failure is promoted to fatal.
#[derive(Debug, thiserror::Error)]
pub enum ChunkedIoError {
    #[error("chunk transfer failed: {0}")]
    Recoverable(String),
    #[error("chunk transfer failed permanently: {0}")]
    Fatal(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("reached maximum number of retries")]
    RetryExhausted {
        #[source]
        caused_by: Box<RetryError<ChunkedIoError>>,
    },
    #[error("write_chunk called after commit")]
    AlreadyCommitted,
    #[error("commit called more than once")]
    AlreadySealed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The compute task itself failed; content carries the server's
/// problem-detail body. Cloning yields an equal-but-distinct instance so
/// cached job errors can be handed back without aliasing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error("job is still pending")]
    Pending,
    #[error("job failed: {message}")]
    Failed { message: String, content: Option<Value> },
    #[error("job was cancelled")]
    Cancelled,
    #[error("status URL does not match the expected compute-task shape: {0}")]
    InvalidStatusUrl(String),
    #[error("server response did not match any known shape: {0}")]
    UnknownResponse(String),
}

impl From<reqwest::Error> for JobError {
    fn from(e: reqwest::Error) -> Self {
        JobError::UnknownResponse(e.to_string())
    }
}
