// Analysis session state held by the controller.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use restops_data::TableModule;
use restops_gateway::{BackendReply, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Backend session exists, no data yet
    Created,
    /// At least one module uploaded, no query answered yet
    DataUploaded,
    /// At least one query answered
    Active,
    Closed,
    /// Backend reported the session invalid or expired
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::DataUploaded => "data_uploaded",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    /// Still backed by a live remote session.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Created | Self::DataUploaded | Self::Active)
    }

    pub fn accepts_queries(&self) -> bool {
        matches!(self, Self::DataUploaded | Self::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One module snapshot held by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedSnapshot {
    pub file_id: String,
    pub rows: usize,
    pub uploaded_at: DateTime<Utc>,
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub query: String,
    pub response: BackendReply,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSession {
    id: SessionId,
    status: SessionStatus,
    uploaded: BTreeMap<TableModule, UploadedSnapshot>,
    history: Vec<Exchange>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl AnalysisSession {
    pub(crate) fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: SessionStatus::Created,
            uploaded: BTreeMap::new(),
            history: Vec::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn uploaded(&self) -> &BTreeMap<TableModule, UploadedSnapshot> {
        &self.uploaded
    }

    pub fn uploaded_modules(&self) -> BTreeSet<TableModule> {
        self.uploaded.keys().copied().collect()
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    /// The last `n` exchanges, newest first.
    pub fn recent(&self, n: usize) -> Vec<&Exchange> {
        self.history.iter().rev().take(n).collect()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    /// Open and idle for longer than `idle_timeout` as of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        self.status.is_open() && now - self.last_activity_at > idle_timeout
    }

    pub(crate) fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            log::info!("session {}: {} -> {}", self.id, self.status, status);
            self.status = status;
        }
    }

    pub(crate) fn record_upload(&mut self, module: TableModule, snapshot: UploadedSnapshot) {
        self.last_activity_at = snapshot.uploaded_at;
        self.uploaded.insert(module, snapshot);
        if self.status == SessionStatus::Created {
            self.set_status(SessionStatus::DataUploaded);
        }
    }

    pub(crate) fn record_exchange(&mut self, exchange: Exchange) {
        self.last_activity_at = exchange.at;
        self.history.push(exchange);
        self.set_status(SessionStatus::Active);
    }
}
