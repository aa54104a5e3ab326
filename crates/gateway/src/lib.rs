//! Boundary adapter to the external analysis backend.
//!
//! [`AnalysisGateway`] resolves the backend credential before any network
//! call, retries transient failures with exponential backoff, and reduces
//! every backend failure to a [`GatewayError`]. [`OpenAiBackend`] speaks the
//! OpenAI Assistants protocol; tests substitute their own [`AnalysisBackend`].

pub mod backend;
pub mod error;
pub mod gateway;
pub mod openai;
pub mod retry;

pub use backend::{
    AnalysisBackend, Artifact, ArtifactKind, BackendReply, SessionId, UploadAck, UploadMetadata,
};
pub use error::{BackendError, GatewayError, TransientKind};
pub use gateway::AnalysisGateway;
pub use openai::OpenAiBackend;
pub use retry::{CancelToken, RetryPolicy};
