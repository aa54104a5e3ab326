//! The seam between the gateway and a concrete reasoning service.
//!
//! A backend performs exactly one remote attempt per call and reports
//! failures as [`BackendError`]. Retrying, credential lookup and error
//! normalization live in [`crate::AnalysisGateway`], so a backend never
//! sleeps except while waiting on its own long-running work.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::retry::CancelToken;

/// Opaque backend-issued session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Describes one uploaded dataset snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    /// Dataset label shown to the analyst, e.g. "POS Sales"
    pub dataset: String,
    /// File name the blob is stored under remotely
    pub file_name: String,
    /// Previously uploaded file for the same dataset, to be replaced
    pub replaces: Option<String>,
}

/// Backend acknowledgement of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadAck {
    pub file_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    File,
}

/// Something the backend generated alongside its answer (a chart, a CSV).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub file_id: String,
    /// Path or label the backend gave the artifact, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The backend's answer to one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendReply {
    pub text: String,
    pub artifacts: Vec<Artifact>,
    /// False when the backend ran the query but reported it could not answer
    pub success: bool,
}

/// Session primitives consumed from an external reasoning backend.
pub trait AnalysisBackend {
    /// Short name for logs ("openai", "fake").
    fn name(&self) -> &str;

    fn create_session(&self, api_key: &str) -> Result<SessionId, BackendError>;

    fn upload_data(
        &self,
        api_key: &str,
        session: &SessionId,
        blob: &[u8],
        meta: &UploadMetadata,
    ) -> Result<UploadAck, BackendError>;

    /// Ask a question. Long-running backends must poll `cancel` while waiting.
    fn submit_query(
        &self,
        api_key: &str,
        session: &SessionId,
        text: &str,
        cancel: &CancelToken,
    ) -> Result<BackendReply, BackendError>;

    fn release_session(&self, api_key: &str, session: &SessionId) -> Result<(), BackendError>;
}
