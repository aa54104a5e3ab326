use std::fmt;
use std::time::Duration;

use restops_config::CredentialError;

/// Raw failure of a single backend attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Connection refused, reset, DNS
    Network(String),
    /// Request or remote run timed out
    Timeout(String),
    /// HTTP 429 or a run that failed on quota
    RateLimited { retry_after: Option<Duration> },
    /// HTTP 5xx
    Upstream { status: u16, message: String },
    /// HTTP 401/403
    Unauthorized { status: u16, message: String },
    /// HTTP 400/422 and other non-retryable 4xx
    BadRequest { status: u16, message: String },
    /// Session resources are gone (HTTP 404 or unparseable id)
    SessionNotFound(String),
    /// Response did not have the expected shape
    Protocol(String),
    /// Stopped by the caller's cancel token
    Cancelled,
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } | Self::Upstream { .. }
        )
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            Self::Network(_) => Some(TransientKind::Network),
            Self::Timeout(_) => Some(TransientKind::Timeout),
            Self::RateLimited { .. } => Some(TransientKind::RateLimited),
            Self::Upstream { .. } => Some(TransientKind::Upstream),
            _ => None,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Timeout(msg) => write!(f, "timed out: {msg}"),
            Self::RateLimited { retry_after: Some(d) } => {
                write!(f, "rate limited (retry after {}s)", d.as_secs())
            }
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::Upstream { status, message } => write!(f, "upstream error ({status}): {message}"),
            Self::Unauthorized { status, message } => write!(f, "unauthorized ({status}): {message}"),
            Self::BadRequest { status, message } => write!(f, "request rejected ({status}): {message}"),
            Self::SessionNotFound(msg) => write!(f, "session not found: {msg}"),
            Self::Protocol(msg) => write!(f, "unexpected response: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for BackendError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Network,
    Timeout,
    RateLimited,
    Upstream,
}

impl TransientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Upstream => "upstream",
        }
    }
}

/// Backend-neutral failure reported by the gateway.
///
/// Callers decide between reconfigure (`Configuration`, `Unauthorized`),
/// retry later (`Transient`) and start over (`SessionInvalid`) from the
/// variant alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No usable credential; no network call was made
    Configuration(CredentialError),
    /// Credential rejected by the backend
    Unauthorized(String),
    /// Request rejected as malformed
    Rejected(String),
    /// Session id unknown or expired on the backend
    SessionInvalid { session: String, message: String },
    /// Retries exhausted on a retryable failure
    Transient { kind: TransientKind, attempts: u32, message: String },
    Protocol(String),
    Cancelled,
}

impl GatewayError {
    /// Map a final backend failure after `attempts` tries.
    pub fn from_backend(err: BackendError, attempts: u32, session: Option<&str>) -> Self {
        if let Some(kind) = err.transient_kind() {
            return Self::Transient {
                kind,
                attempts,
                message: err.to_string(),
            };
        }
        match err {
            BackendError::Unauthorized { message, .. } => Self::Unauthorized(message),
            BackendError::BadRequest { message, .. } => Self::Rejected(message),
            BackendError::SessionNotFound(message) => Self::SessionInvalid {
                session: session.unwrap_or_default().to_string(),
                message,
            },
            BackendError::Cancelled => Self::Cancelled,
            other => Self::Protocol(other.to_string()),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(f, "backend not configured: {e}"),
            Self::Unauthorized(msg) => write!(f, "credential rejected: {msg}"),
            Self::Rejected(msg) => write!(f, "request rejected: {msg}"),
            Self::SessionInvalid { session, message } => {
                write!(f, "session {session} is no longer valid: {message}")
            }
            Self::Transient { kind, attempts, message } => write!(
                f,
                "{} after {} attempt(s): {}",
                kind.as_str(),
                attempts,
                message
            ),
            Self::Protocol(msg) => write!(f, "unexpected backend response: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for GatewayError {}
