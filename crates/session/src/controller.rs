//! Session Controller: owns the single analysis session and drives it
//! through `Created -> DataUploaded -> Active -> Closed`.
//!
//! Every method takes `&mut self`, so two queries can never interleave on one
//! controller. Errors that leave the session usable (transient failures,
//! cancellation, a bad request) never touch its state; only a session the
//! backend no longer recognizes is moved to `Failed`.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use restops_config::{OnExisting, SessionSettings};
use restops_data::{export, LoadError, LoadReason, RegistryHandle, TableModule};
use restops_gateway::{AnalysisBackend, AnalysisGateway, CancelToken, GatewayError, SessionId, UploadMetadata};

use crate::error::{SessionError, UploadError, UploadFailure, UploadReport};
use crate::session::{AnalysisSession, Exchange, SessionStatus, UploadedSnapshot};

/// Summary of the controller's session for display.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub status: SessionStatus,
    pub uploaded: BTreeSet<TableModule>,
    pub exchanges: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

pub struct SessionController<B: AnalysisBackend> {
    gateway: AnalysisGateway<B>,
    registry: Arc<RegistryHandle>,
    settings: SessionSettings,
    session: Option<AnalysisSession>,
}

impl<B: AnalysisBackend> SessionController<B> {
    pub fn new(gateway: AnalysisGateway<B>, registry: Arc<RegistryHandle>, settings: SessionSettings) -> Self {
        Self {
            gateway,
            registry,
            settings,
            session: None,
        }
    }

    pub fn gateway(&self) -> &AnalysisGateway<B> {
        &self.gateway
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// The current session, including a closed or failed one until the next `create`.
    pub fn session(&self) -> Option<&AnalysisSession> {
        self.session.as_ref()
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        self.session.as_ref().map(|s| SessionSummary {
            id: s.id().clone(),
            status: s.status(),
            uploaded: s.uploaded_modules(),
            exchanges: s.history().len(),
            created_at: s.created_at(),
            last_activity_at: s.last_activity_at(),
        })
    }

    /// Open a session, or reuse the open one depending on `on_existing`.
    pub fn create(&mut self) -> Result<SessionId, SessionError> {
        self.reclaim_stale();

        let open = self
            .session
            .as_ref()
            .filter(|s| s.status().is_open())
            .map(|s| s.id().clone());

        match (open, self.settings.on_existing) {
            (Some(id), OnExisting::Reuse) => {
                log::info!("reusing open session {}", id);
                Ok(id)
            }
            (Some(id), OnExisting::RequireClose) => Err(SessionError::AlreadyOpen(id)),
            (None, _) => {
                let id = self
                    .gateway
                    .create_session(&CancelToken::new())
                    .map_err(SessionError::from_creation)?;
                self.session = Some(AnalysisSession::new(id.clone(), Utc::now()));
                Ok(id)
            }
        }
    }

    /// Serialize the named modules from the current registry snapshot and send them.
    ///
    /// Modules already uploaded are replaced, not duplicated. One module's
    /// failure never stops the others; they are listed in the report.
    pub fn upload(&mut self, id: &SessionId, modules: &[TableModule]) -> Result<UploadReport, SessionError> {
        self.open_session(id)?;

        let snapshot = self.registry.snapshot();
        let wanted: BTreeSet<TableModule> = modules.iter().copied().collect();
        let wanted: Vec<TableModule> = wanted.into_iter().collect();
        let mut report = UploadReport::default();

        for (i, &module) in wanted.iter().enumerate() {
            let table = match snapshot.get(module) {
                Some(Ok(table)) => Arc::clone(table),
                Some(Err(load)) => {
                    report.failed.push(UploadError {
                        module,
                        failure: UploadFailure::NotLoaded(load.clone()),
                    });
                    continue;
                }
                None => {
                    let load = LoadError {
                        module,
                        reason: LoadReason::Missing(self.registry.source().path_for(module)),
                    };
                    report.failed.push(UploadError {
                        module,
                        failure: UploadFailure::NotLoaded(load),
                    });
                    continue;
                }
            };

            let blob = match export(&*table) {
                Ok(bytes) => bytes,
                Err(e) => {
                    report.failed.push(UploadError {
                        module,
                        failure: UploadFailure::Export(e.to_string()),
                    });
                    continue;
                }
            };

            let session = self.open_session(id)?;
            let meta = UploadMetadata {
                dataset: module.display_name().to_string(),
                file_name: format!("{}.csv", module.download_stem()),
                replaces: session.uploaded().get(&module).map(|u| u.file_id.clone()),
            };

            match self.gateway.upload(id, &blob, &meta, &CancelToken::new()) {
                Ok(ack) => {
                    log::info!("session {}: uploaded {} ({} rows)", id, module, table.row_count());
                    let snapshot = UploadedSnapshot {
                        file_id: ack.file_id,
                        rows: table.row_count(),
                        uploaded_at: Utc::now(),
                    };
                    self.open_session_mut(id)?.record_upload(module, snapshot);
                    report.uploaded.push(module);
                }
                Err(GatewayError::SessionInvalid { session, message }) => {
                    self.fail(id);
                    let err = GatewayError::SessionInvalid { session, message: message.clone() };
                    // This module and every one not yet sent
                    for &rest in &wanted[i..] {
                        report.failed.push(UploadError {
                            module: rest,
                            failure: UploadFailure::Gateway(err.clone()),
                        });
                    }
                    log::warn!(
                        "session {}: lost during upload; {} uploaded, {} not uploaded",
                        id,
                        report.uploaded.len(),
                        report.failed.len()
                    );
                    return Err(SessionError::UploadAborted {
                        session: id.clone(),
                        message,
                        partial: report,
                    });
                }
                Err(e) => {
                    log::warn!("session {}: upload of {} failed: {}", id, module, e);
                    report.failed.push(UploadError {
                        module,
                        failure: UploadFailure::Gateway(e),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Ask one question. On success exactly one exchange is appended.
    pub fn query(&mut self, id: &SessionId, text: &str, cancel: &CancelToken) -> Result<&Exchange, SessionError> {
        let session = self.open_session(id)?;
        if !session.status().accepts_queries() {
            return Err(SessionError::NotReady {
                session: id.clone(),
                status: session.status(),
            });
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyQuery);
        }

        match self.gateway.query(id, text, cancel) {
            Ok(response) => {
                let session = self.open_session_mut(id)?;
                session.record_exchange(Exchange {
                    query: text.to_string(),
                    response,
                    at: Utc::now(),
                });
                session
                    .history()
                    .last()
                    .ok_or_else(|| SessionError::NotFound(id.clone()))
            }
            Err(err) => {
                let err = SessionError::from_query(err, id);
                match &err {
                    SessionError::FatalSession { .. } => self.fail(id),
                    _ => log::warn!("session {}: query not answered: {}", id, err),
                }
                Err(err)
            }
        }
    }

    /// Release the backend session. Always ends `Closed`, even if the release fails.
    pub fn close(&mut self, id: &SessionId) -> Result<(), SessionError> {
        let status = self
            .session
            .as_ref()
            .filter(|s| s.id() == id)
            .map(|s| s.status())
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        if status == SessionStatus::Closed {
            return Ok(());
        }

        if let Err(e) = self.gateway.release(id) {
            log::warn!(
                "session {}: backend release failed ({}); closing locally, remote resources may remain",
                id,
                e
            );
        }
        if let Some(session) = self.session.as_mut() {
            session.set_status(SessionStatus::Closed);
        }
        Ok(())
    }

    /// Close the open session if it has been idle past the configured timeout.
    pub fn reclaim_stale(&mut self) -> bool {
        self.reclaim_stale_at(Utc::now())
    }

    pub fn reclaim_stale_at(&mut self, now: DateTime<Utc>) -> bool {
        let idle = chrono::Duration::from_std(self.settings.idle_timeout())
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let stale = match self.session.as_ref() {
            Some(s) if s.is_stale(now, idle) => s.id().clone(),
            _ => return false,
        };
        log::info!("session {} idle longer than {}s, reclaiming", stale, idle.num_seconds());
        self.close(&stale).is_ok()
    }

    fn open_session(&self, id: &SessionId) -> Result<&AnalysisSession, SessionError> {
        let session = self
            .session
            .as_ref()
            .filter(|s| s.id() == id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        if !session.status().is_open() {
            return Err(SessionError::Unusable {
                session: id.clone(),
                status: session.status(),
            });
        }
        Ok(session)
    }

    fn open_session_mut(&mut self, id: &SessionId) -> Result<&mut AnalysisSession, SessionError> {
        self.open_session(id)?;
        self.session
            .as_mut()
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    fn fail(&mut self, id: &SessionId) {
        if let Some(session) = self.session.as_mut().filter(|s| s.id() == id) {
            session.set_status(SessionStatus::Failed);
        }
    }
}

impl<B: AnalysisBackend> Drop for SessionController<B> {
    fn drop(&mut self) {
        let open = self
            .session
            .as_ref()
            .filter(|s| s.status().is_open())
            .map(|s| s.id().clone());
        if let Some(id) = open {
            log::info!("closing session {} on shutdown", id);
            let _ = self.close(&id);
        }
    }
}
