//! Retrying, credential-aware front for an [`AnalysisBackend`].

use parking_lot::Mutex;

use restops_config::{CredentialChain, KeySource, ResolvedKey};

use crate::backend::{AnalysisBackend, BackendReply, SessionId, UploadAck, UploadMetadata};
use crate::error::{BackendError, GatewayError};
use crate::retry::{CancelToken, RetryPolicy};

pub struct AnalysisGateway<B> {
    backend: B,
    credentials: CredentialChain,
    retry: RetryPolicy,
    key: Mutex<Option<ResolvedKey>>,
}

impl<B: AnalysisBackend> AnalysisGateway<B> {
    pub fn new(backend: B, credentials: CredentialChain, retry: RetryPolicy) -> Self {
        Self {
            backend,
            credentials,
            retry,
            key: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Resolve the credential, caching it for later calls.
    ///
    /// Fails with [`GatewayError::Configuration`] before anything touches the network.
    pub fn credential(&self) -> Result<ResolvedKey, GatewayError> {
        let mut cached = self.key.lock();
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }
        let key = self.credentials.resolve().map_err(GatewayError::Configuration)?;
        log::info!("using API key from {}", key.source.as_str());
        *cached = Some(key.clone());
        Ok(key)
    }

    /// Where the credential comes from, without keeping it.
    pub fn credential_source(&self) -> Result<KeySource, GatewayError> {
        self.credential().map(|k| k.source)
    }

    /// Drop the cached credential so the next call resolves it again.
    pub fn forget_credential(&self) {
        *self.key.lock() = None;
    }

    pub fn create_session(&self, cancel: &CancelToken) -> Result<SessionId, GatewayError> {
        let key = self.credential()?;
        let id = self.with_retry("create session", None, cancel, || {
            self.backend.create_session(&key.key)
        })?;
        log::info!("{} session {} created", self.backend.name(), id);
        Ok(id)
    }

    pub fn upload(
        &self,
        session: &SessionId,
        blob: &[u8],
        meta: &UploadMetadata,
        cancel: &CancelToken,
    ) -> Result<UploadAck, GatewayError> {
        let key = self.credential()?;
        let label = format!("upload {}", meta.dataset);
        self.with_retry(&label, Some(session), cancel, || {
            self.backend.upload_data(&key.key, session, blob, meta)
        })
    }

    /// Submit one query. Retries re-submit the same text.
    pub fn query(
        &self,
        session: &SessionId,
        text: &str,
        cancel: &CancelToken,
    ) -> Result<BackendReply, GatewayError> {
        let key = self.credential()?;
        self.with_retry("query", Some(session), cancel, || {
            self.backend.submit_query(&key.key, session, text, cancel)
        })
    }

    pub fn release(&self, session: &SessionId) -> Result<(), GatewayError> {
        let key = self.credential()?;
        self.with_retry("release session", Some(session), &CancelToken::new(), || {
            self.backend.release_session(&key.key, session)
        })
    }

    fn with_retry<T>(
        &self,
        what: &str,
        session: Option<&SessionId>,
        cancel: &CancelToken,
        mut attempt_once: impl FnMut() -> Result<T, BackendError>,
    ) -> Result<T, GatewayError> {
        let session_label = session.map(SessionId::as_str);
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            attempt += 1;

            match attempt_once() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt <= self.retry.max_retries => {
                    let wait = self.retry.delay_for(attempt, err.retry_after());
                    log::warn!(
                        "{} failed: {}; retry {}/{} in {}ms",
                        what,
                        err,
                        attempt,
                        self.retry.max_retries,
                        wait.as_millis()
                    );
                    if !cancel.sleep(wait) {
                        return Err(GatewayError::Cancelled);
                    }
                }
                Err(err) => {
                    log::warn!("{} failed after {} attempt(s): {}", what, attempt, err);
                    return Err(GatewayError::from_backend(err, attempt, session_label));
                }
            }
        }
    }
}
