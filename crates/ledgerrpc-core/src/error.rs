//! Transport-level error types.
//!
//! Every failure a transport can produce is one [`RpcError`] variant, and every
//! variant maps onto exactly one [`ErrorKind`]. Callers branch on the kind (or
//! on [`RpcError::problem`] for business errors) rather than on message text.

use std::error::Error as StdError;

use serde_json::Value;
use thiserror::Error;

use crate::problem::{self, ProblemDetails};
use crate::request::JsonRpcError;

/// Boxed lower-level cause kept for `source()` chains.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Message fragments that mark a network failure as transient.
const TRANSIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "no such host",
    "network is unreachable",
    "timeout",
    "timed out",
    "dns error",
];

/// Coarse classification of an [`RpcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection could not be established, was lost, or was closed.
    Network,
    /// No response within the deadline.
    Timeout,
    /// The peer answered with something that is not a usable JSON-RPC response.
    InvalidResponse,
    /// Well-formed JSON-RPC `error` object.
    Protocol,
    /// The operation is not available on this transport.
    NotSupported,
    /// The caller's context was cancelled or its deadline passed.
    Cancelled,
    /// The request could not be encoded.
    InvalidRequest,
    /// Endpoint or TLS configuration is unusable.
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::InvalidResponse => "invalid-response",
            Self::Protocol => "protocol",
            Self::NotSupported => "not-supported",
            Self::Cancelled => "cancelled",
            Self::InvalidRequest => "invalid-request",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

/// A JSON-RPC error object returned by the node, with problem details
/// extracted from `data` when the node supplied them.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
    pub problem: Option<ProblemDetails>,
}

impl ProtocolError {
    /// Wrap a raw error object, attempting problem-details extraction once.
    pub fn from_rpc(err: JsonRpcError) -> Self {
        let problem = problem::extract(err.data.as_ref());
        Self {
            code: err.code,
            message: err.message,
            data: err.data,
            problem,
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.problem {
            Some(problem) => write!(
                f,
                "{problem} (JSON-RPC error {}: {})",
                self.code, self.message
            ),
            None => {
                let raw = self
                    .data
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| "<absent>".into());
                write!(
                    f,
                    "node returned JSON-RPC error {} ({}) without structured problem details \
                     in error.data; raw data: {raw}",
                    self.code, self.message
                )
            }
        }
    }
}

impl StdError for ProtocolError {}

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection refused, reset, closed, DNS failure, write failure.
    #[error("network error: {message}")]
    Network {
        message: String,
        /// Set when the lower layer reported a connect or temporary failure.
        temporary: bool,
        #[source]
        source: Option<BoxError>,
    },

    /// Non-2xx HTTP status. 5xx and 429 classify as network failures.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// No response within the configured duration.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be decoded as a JSON-RPC envelope.
    #[error("invalid response: {message}")]
    InvalidResponse {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// JSON-RPC protocol-level error returned by the node.
    #[error(transparent)]
    Protocol(Box<ProtocolError>),

    /// Operation unavailable on this transport (e.g. subscribe over HTTP).
    #[error("{operation} is not supported by the {transport} transport")]
    NotSupported {
        operation: &'static str,
        transport: &'static str,
    },

    /// The caller cancelled the call.
    #[error("call cancelled")]
    Cancelled,

    /// The caller's deadline passed before the call completed.
    #[error("call deadline exceeded")]
    DeadlineExceeded,

    /// The request could not be encoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Endpoint, protocol or TLS configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Every retry failed with a retryable error.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<RpcError>,
    },
}

impl RpcError {
    /// A network error without an underlying cause.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            temporary: false,
            source: None,
        }
    }

    /// A network error wrapping `source`; the message includes its full
    /// cause chain so transient patterns deep in the chain are visible.
    pub fn network_from<E>(source: E, temporary: bool) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Network {
            message: chain_message(&source),
            temporary,
            source: Some(Box::new(source)),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
            source: None,
        }
    }

    pub fn invalid_response_from<E>(context: &str, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::InvalidResponse {
            message: format!("{context}: {source}"),
            source: Some(Box::new(source)),
        }
    }

    /// Build a protocol error from the node's error object.
    pub fn protocol(err: JsonRpcError) -> Self {
        Self::Protocol(Box::new(ProtocolError::from_rpc(err)))
    }

    /// The coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Http { status, .. } if is_retryable_status(*status) => ErrorKind::Network,
            Self::Http { .. } => ErrorKind::InvalidResponse,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::Cancelled | Self::DeadlineExceeded => ErrorKind::Cancelled,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Config(_) => ErrorKind::Config,
            Self::RetriesExhausted { last, .. } => last.kind(),
        }
    }

    /// The protocol error, looking through a retries-exhausted wrapper.
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::RetriesExhausted { last, .. } => last.protocol_error(),
            _ => None,
        }
    }

    /// Structured business error details, if the node supplied them.
    pub fn problem(&self) -> Option<&ProblemDetails> {
        self.protocol_error().and_then(|e| e.problem.as_ref())
    }

    /// Returns `true` if this error is transient and the request may be
    /// re-issued.
    ///
    /// Protocol errors are never retryable: the node evaluated the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => is_retryable_status(*status),
            Self::Network {
                message, temporary, ..
            } => *temporary || matches_transient(message),
            _ => false,
        }
    }

    /// Returns `true` if the node evaluated the request and rejected it.
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

/// HTTP status codes that indicate a transient server-side condition.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn matches_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Render an error followed by each distinct message in its source chain.
pub fn chain_message(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        let text = inner.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        cause = inner.source();
    }
    message
}
