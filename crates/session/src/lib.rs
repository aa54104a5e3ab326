//! Analysis session layer.
//!
//! A [`SessionController`] holds at most one [`AnalysisSession`] at a time:
//! it creates the remote session through the gateway, uploads module
//! snapshots taken from the table registry, and records every answered
//! query in order. Session state lives only in memory.

pub mod controller;
pub mod error;
pub mod session;

pub use controller::{SessionController, SessionSummary};
pub use error::{SessionError, UploadError, UploadFailure, UploadReport};
pub use session::{AnalysisSession, Exchange, SessionStatus, UploadedSnapshot};
