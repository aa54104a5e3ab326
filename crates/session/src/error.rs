use std::fmt;

use restops_config::CredentialError;
use restops_data::{LoadError, TableModule};
use restops_gateway::{GatewayError, SessionId};

use crate::session::SessionStatus;

/// Why one module's snapshot did not reach the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadFailure {
    /// The module is not in the registry
    NotLoaded(LoadError),
    /// Serializing the table failed
    Export(String),
    Gateway(GatewayError),
}

/// A single module's upload failure. Never affects other modules.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadError {
    pub module: TableModule,
    pub failure: UploadFailure,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            UploadFailure::NotLoaded(e) => write!(f, "{} not uploaded: {}", self.module, e.reason),
            UploadFailure::Export(msg) => write!(f, "{} not uploaded: {}", self.module, msg),
            UploadFailure::Gateway(e) => write!(f, "{} not uploaded: {}", self.module, e),
        }
    }
}

impl std::error::Error for UploadError {}

/// Outcome of one `upload` call: partial success is normal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReport {
    pub uploaded: Vec<TableModule>,
    pub failed: Vec<UploadError>,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_modules(&self) -> Vec<TableModule> {
        self.failed.iter().map(|e| e.module).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// No usable credential. Fix configuration before retrying.
    Configuration(CredentialError),
    /// The backend refused or could not be reached while creating a session
    Creation(GatewayError),
    /// A session is already open and the policy requires closing it first
    AlreadyOpen(SessionId),
    /// No session with this id is held by the controller
    NotFound(SessionId),
    /// The session is closed or failed; create a new one
    Unusable { session: SessionId, status: SessionStatus },
    /// Query before any successful upload
    NotReady { session: SessionId, status: SessionStatus },
    EmptyQuery,
    /// Timeout or rate limit after retries; the session is unchanged
    Transient(GatewayError),
    /// The backend no longer knows the session; it has been marked failed
    FatalSession { session: SessionId, message: String },
    /// The backend dropped the session mid-upload; it has been marked failed.
    /// `partial` lists what was uploaded before that and every module that was not.
    UploadAborted { session: SessionId, message: String, partial: UploadReport },
    /// The caller cancelled; the session is unchanged
    Cancelled,
    /// Any other backend rejection of a query (bad credential, malformed request)
    Query(GatewayError),
}

impl SessionError {
    /// Worth retrying the same call later without other changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Cancelled)
            || matches!(self, Self::Creation(e) if e.is_transient())
    }

    pub(crate) fn from_creation(err: GatewayError) -> Self {
        match err {
            GatewayError::Configuration(e) => Self::Configuration(e),
            other => Self::Creation(other),
        }
    }

    pub(crate) fn from_query(err: GatewayError, session: &SessionId) -> Self {
        match err {
            GatewayError::Configuration(e) => Self::Configuration(e),
            GatewayError::Transient { .. } => Self::Transient(err),
            GatewayError::Cancelled => Self::Cancelled,
            GatewayError::SessionInvalid { message, .. } => Self::FatalSession {
                session: session.clone(),
                message,
            },
            other => Self::Query(other),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(f, "analysis backend not configured: {e}"),
            Self::Creation(e) => write!(f, "could not create analysis session: {e}"),
            Self::AlreadyOpen(id) => write!(f, "session {id} is still open; close it first"),
            Self::NotFound(id) => write!(f, "no session {id}"),
            Self::Unusable { session, status } => {
                write!(f, "session {session} is {status}; create a new session")
            }
            Self::NotReady { session, status } => write!(
                f,
                "session {session} is {status}; upload at least one dataset before asking"
            ),
            Self::EmptyQuery => write!(f, "query is empty"),
            Self::Transient(e) => write!(f, "query failed, try again: {e}"),
            Self::FatalSession { session, message } => {
                write!(f, "session {session} is no longer valid: {message}")
            }
            Self::UploadAborted { session, message, partial } => write!(
                f,
                "session {session} is no longer valid: {message} ({} of {} modules uploaded)",
                partial.uploaded.len(),
                partial.uploaded.len() + partial.failed.len()
            ),
            Self::Cancelled => write!(f, "query cancelled"),
            Self::Query(e) => write!(f, "query failed: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}
