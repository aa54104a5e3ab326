use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::{tempdir, TempDir};

use restops_config::{CredentialChain, OnExisting, SessionSettings};
use restops_data::csv::parse_table;
use restops_data::{DataSource, LoadReason, Registry, RegistryHandle, TableModule};
use restops_gateway::{
    AnalysisBackend, AnalysisGateway, BackendError, BackendReply, CancelToken, GatewayError,
    RetryPolicy, SessionId, UploadAck, UploadMetadata,
};
use restops_session::{SessionController, SessionError, SessionStatus, UploadFailure};

/// In-memory backend recording every call.
#[derive(Default)]
struct FakeBackend {
    sessions_created: RefCell<u32>,
    uploads: RefCell<Vec<UploadMetadata>>,
    queries: RefCell<Vec<String>>,
    releases: RefCell<u32>,
    replies: RefCell<VecDeque<Result<BackendReply, BackendError>>>,
    /// Datasets whose upload is rejected
    reject_uploads: Vec<&'static str>,
    /// Dataset whose upload finds the remote session gone
    expire_on_upload: Option<&'static str>,
    fail_release: bool,
}

impl FakeBackend {
    fn script(self, replies: Vec<Result<BackendReply, BackendError>>) -> Self {
        *self.replies.borrow_mut() = replies.into();
        self
    }
}

impl AnalysisBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn create_session(&self, _api_key: &str) -> Result<SessionId, BackendError> {
        let mut n = self.sessions_created.borrow_mut();
        *n += 1;
        Ok(SessionId::new(format!("fake-{}", *n)))
    }

    fn upload_data(
        &self,
        _api_key: &str,
        _session: &SessionId,
        blob: &[u8],
        meta: &UploadMetadata,
    ) -> Result<UploadAck, BackendError> {
        assert!(!blob.is_empty());
        if self.expire_on_upload == Some(meta.dataset.as_str()) {
            return Err(BackendError::SessionNotFound("No thread found".into()));
        }
        if self.reject_uploads.contains(&meta.dataset.as_str()) {
            return Err(BackendError::BadRequest { status: 400, message: "file too large".into() });
        }
        let mut uploads = self.uploads.borrow_mut();
        uploads.push(meta.clone());
        Ok(UploadAck { file_id: format!("file-{}", uploads.len()) })
    }

    fn submit_query(
        &self,
        _api_key: &str,
        _session: &SessionId,
        text: &str,
        _cancel: &CancelToken,
    ) -> Result<BackendReply, BackendError> {
        self.queries.borrow_mut().push(text.to_string());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(answer(&format!("answer to {text}"))))
    }

    fn release_session(&self, _api_key: &str, _session: &SessionId) -> Result<(), BackendError> {
        *self.releases.borrow_mut() += 1;
        if self.fail_release {
            return Err(BackendError::Protocol("release refused".into()));
        }
        Ok(())
    }
}

fn answer(text: &str) -> BackendReply {
    BackendReply { text: text.to_string(), artifacts: vec![], success: true }
}

fn timeout() -> Result<BackendReply, BackendError> {
    Err(BackendError::Timeout("run still in progress".into()))
}

fn write_modules(dir: &Path) {
    for module in TableModule::ALL {
        let body = match module {
            TableModule::Menu => "Item_Name,Price\nCheeseburger,9.50\nFries,3.00\n".to_string(),
            other => format!("Id,Label\n1,{}\n", other.slug()),
        };
        fs::write(dir.join(module.file_name()), body).unwrap();
    }
}

struct Fixture {
    _dir: TempDir,
    controller: SessionController<FakeBackend>,
}

fn fixture_with(backend: FakeBackend, settings: SessionSettings, prepare: impl FnOnce(&Path)) -> Fixture {
    let dir = tempdir().unwrap();
    write_modules(dir.path());
    prepare(dir.path());
    let registry = Arc::new(RegistryHandle::open(DataSource::new(dir.path())));
    let gateway = AnalysisGateway::new(
        backend,
        CredentialChain::empty().explicit(Some("sk-test".into())),
        RetryPolicy::immediate(3),
    );
    Fixture {
        _dir: dir,
        controller: SessionController::new(gateway, registry, settings),
    }
}

fn fixture(backend: FakeBackend) -> Fixture {
    fixture_with(backend, SessionSettings::default(), |_| {})
}

fn backend(c: &SessionController<FakeBackend>) -> &FakeBackend {
    c.gateway().backend()
}

// ── Upload ──────────────────────────────────────────────────────────

#[test]
fn partial_upload_when_finance_is_missing() {
    let mut fx = fixture_with(FakeBackend::default(), SessionSettings::default(), |dir| {
        fs::remove_file(dir.join("finance_accounting.csv")).unwrap();
    });
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    let report = c.upload(&id, &[TableModule::Menu, TableModule::Finance]).unwrap();

    assert_eq!(report.uploaded, vec![TableModule::Menu]);
    assert_eq!(report.failed_modules(), vec![TableModule::Finance]);
    assert!(matches!(report.failed[0].failure, UploadFailure::NotLoaded(_)));
    let session = c.session().unwrap();
    assert_eq!(session.status(), SessionStatus::DataUploaded);
    assert_eq!(session.uploaded_modules().into_iter().collect::<Vec<_>>(), vec![TableModule::Menu]);
}

#[test]
fn partial_upload_when_backend_rejects_one_module() {
    let mut fx = fixture(FakeBackend {
        reject_uploads: vec!["Finance & Accounting"],
        ..FakeBackend::default()
    });
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    let report = c.upload(&id, &[TableModule::Finance, TableModule::Menu]).unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.uploaded, vec![TableModule::Menu]);
    assert!(matches!(
        report.failed[0].failure,
        UploadFailure::Gateway(GatewayError::Rejected(_))
    ));
    assert_eq!(c.session().unwrap().status(), SessionStatus::DataUploaded);
}

#[test]
fn session_lost_mid_upload_keeps_partial_report() {
    let mut fx = fixture_with(
        FakeBackend {
            expire_on_upload: Some("Finance & Accounting"),
            ..FakeBackend::default()
        },
        SessionSettings::default(),
        |dir| fs::remove_file(dir.join("reviews.csv")).unwrap(),
    );
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    let modules = [
        TableModule::Marketing,
        TableModule::Finance,
        TableModule::Reviews,
        TableModule::PosSales,
        TableModule::Menu,
    ];
    let err = c.upload(&id, &modules).unwrap_err();

    let SessionError::UploadAborted { partial, .. } = err else {
        panic!("expected UploadAborted");
    };
    assert_eq!(partial.uploaded, vec![TableModule::Menu, TableModule::PosSales]);
    assert_eq!(
        partial.failed_modules(),
        vec![TableModule::Reviews, TableModule::Finance, TableModule::Marketing]
    );
    assert!(matches!(partial.failed[0].failure, UploadFailure::NotLoaded(_)));
    assert!(matches!(
        partial.failed[2].failure,
        UploadFailure::Gateway(GatewayError::SessionInvalid { .. })
    ));
    assert_eq!(backend(c).uploads.borrow().len(), 2);
    assert_eq!(c.session().unwrap().status(), SessionStatus::Failed);
}

#[test]
fn module_absent_from_snapshot_is_reported() {
    let dir = tempdir().unwrap();
    let menu = parse_table("Item_Name,Price\nFries,3.00\n").unwrap();
    let registry = Registry::from_results([(TableModule::Menu, Ok(menu))]);
    let handle = RegistryHandle::with_snapshot(DataSource::new(dir.path()), registry);
    let gateway = AnalysisGateway::new(
        FakeBackend::default(),
        CredentialChain::empty().explicit(Some("sk-test".into())),
        RetryPolicy::never(),
    );
    let mut c = SessionController::new(gateway, Arc::new(handle), SessionSettings::default());

    let id = c.create().unwrap();
    let report = c.upload(&id, &[TableModule::Menu, TableModule::Inventory]).unwrap();

    assert_eq!(report.uploaded, vec![TableModule::Menu]);
    assert_eq!(report.failed_modules(), vec![TableModule::Inventory]);
    let UploadFailure::NotLoaded(load) = &report.failed[0].failure else {
        panic!("expected NotLoaded");
    };
    assert!(matches!(&load.reason, LoadReason::Missing(path) if path.ends_with("inventory.csv")));
}

#[test]
fn reupload_replaces_previous_snapshot() {
    let mut fx = fixture(FakeBackend::default());
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    c.upload(&id, &[TableModule::Menu]).unwrap();
    c.upload(&id, &[TableModule::Menu, TableModule::Menu]).unwrap();

    let uploads = backend(c).uploads.borrow().clone();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].file_name, "menu.csv");
    assert_eq!(uploads[0].replaces, None);
    assert_eq!(uploads[1].replaces.as_deref(), Some("file-1"));

    let session = c.session().unwrap();
    assert_eq!(session.uploaded().len(), 1);
    assert_eq!(session.uploaded()[&TableModule::Menu].file_id, "file-2");
    assert_eq!(session.uploaded()[&TableModule::Menu].rows, 2);
}

// ── Query ───────────────────────────────────────────────────────────

#[test]
fn query_before_upload_is_not_ready() {
    let mut fx = fixture(FakeBackend::default());
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    let err = c.query(&id, "What sells best?", &CancelToken::new()).unwrap_err();

    assert!(matches!(err, SessionError::NotReady { status: SessionStatus::Created, .. }));
    assert!(backend(c).queries.borrow().is_empty());
}

#[test]
fn timeouts_then_success_appends_one_exchange() {
    let mut fx = fixture(FakeBackend::default().script(vec![
        timeout(),
        timeout(),
        timeout(),
        Ok(answer("Cheeseburger leads sales.")),
    ]));
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    c.upload(&id, &[TableModule::Menu]).unwrap();
    let exchange = c.query(&id, "  What sells best?  ", &CancelToken::new()).unwrap();
    assert_eq!(exchange.query, "What sells best?");
    assert_eq!(exchange.response.text, "Cheeseburger leads sales.");

    assert_eq!(backend(c).queries.borrow().len(), 4);
    let session = c.session().unwrap();
    assert_eq!(session.history().len(), 1);
    assert_eq!(session.status(), SessionStatus::Active);
}

#[test]
fn transient_failure_leaves_history_and_state() {
    let mut fx = fixture(FakeBackend::default().script(vec![
        Ok(answer("first")),
        timeout(),
        timeout(),
        timeout(),
        timeout(),
    ]));
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    c.upload(&id, &[TableModule::Menu]).unwrap();
    c.query(&id, "one", &CancelToken::new()).unwrap();
    let err = c.query(&id, "two", &CancelToken::new()).unwrap_err();

    assert!(matches!(err, SessionError::Transient(GatewayError::Transient { attempts: 4, .. })));
    assert!(err.is_retryable());
    let session = c.session().unwrap();
    assert_eq!(session.status(), SessionStatus::Active);
    assert_eq!(session.history().len(), 1);
    assert_eq!(session.history()[0].query, "one");
}

#[test]
fn answers_are_kept_in_submission_order() {
    let mut fx = fixture(FakeBackend::default());
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    c.upload(&id, &[TableModule::Menu]).unwrap();
    for q in ["first", "second", "third"] {
        c.query(&id, q, &CancelToken::new()).unwrap();
    }

    let session = c.session().unwrap();
    let asked: Vec<&str> = session.history().iter().map(|e| e.query.as_str()).collect();
    assert_eq!(asked, vec!["first", "second", "third"]);
    assert_eq!(session.recent(1)[0].query, "third");
}

#[test]
fn unsuccessful_reply_is_still_recorded() {
    let mut fx = fixture(FakeBackend::default().script(vec![Ok(BackendReply {
        text: "The analysis could not be completed.".into(),
        artifacts: vec![],
        success: false,
    })]));
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    c.upload(&id, &[TableModule::Menu]).unwrap();
    let exchange = c.query(&id, "Forecast next year", &CancelToken::new()).unwrap();

    assert!(!exchange.response.success);
    assert_eq!(c.session().unwrap().history().len(), 1);
}

#[test]
fn blank_query_is_rejected_locally() {
    let mut fx = fixture(FakeBackend::default());
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    c.upload(&id, &[TableModule::Menu]).unwrap();

    assert_eq!(c.query(&id, "   ", &CancelToken::new()).unwrap_err(), SessionError::EmptyQuery);
    assert!(backend(c).queries.borrow().is_empty());
}

#[test]
fn cancelled_query_changes_nothing() {
    let mut fx = fixture(FakeBackend::default());
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    c.upload(&id, &[TableModule::Menu]).unwrap();
    let token = CancelToken::new();
    token.cancel();

    assert_eq!(c.query(&id, "anything", &token).unwrap_err(), SessionError::Cancelled);
    assert_eq!(c.session().unwrap().status(), SessionStatus::DataUploaded);
    assert!(c.session().unwrap().history().is_empty());
}

#[test]
fn expired_session_is_marked_failed() {
    let mut fx = fixture(
        FakeBackend::default().script(vec![Err(BackendError::SessionNotFound("No thread found".into()))]),
    );
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    c.upload(&id, &[TableModule::Menu]).unwrap();
    let err = c.query(&id, "still there?", &CancelToken::new()).unwrap_err();

    assert!(matches!(err, SessionError::FatalSession { .. }));
    assert_eq!(c.session().unwrap().status(), SessionStatus::Failed);

    let err = c.query(&id, "again?", &CancelToken::new()).unwrap_err();
    assert!(matches!(err, SessionError::Unusable { status: SessionStatus::Failed, .. }));
    assert_eq!(backend(c).queries.borrow().len(), 1);
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[test]
fn close_succeeds_even_when_release_fails() {
    let mut fx = fixture(FakeBackend { fail_release: true, ..FakeBackend::default() });
    let c = &mut fx.controller;

    let id = c.create().unwrap();
    c.close(&id).unwrap();

    assert_eq!(c.session().unwrap().status(), SessionStatus::Closed);
    assert_eq!(*backend(c).releases.borrow(), 1);

    // Closing twice does not touch the backend again
    c.close(&id).unwrap();
    assert_eq!(*backend(c).releases.borrow(), 1);

    let err = c.upload(&id, &[TableModule::Menu]).unwrap_err();
    assert!(matches!(err, SessionError::Unusable { status: SessionStatus::Closed, .. }));
}

#[test]
fn create_reuses_open_session_by_default() {
    let mut fx = fixture(FakeBackend::default());
    let c = &mut fx.controller;

    let first = c.create().unwrap();
    let second = c.create().unwrap();

    assert_eq!(first, second);
    assert_eq!(*backend(c).sessions_created.borrow(), 1);
}

#[test]
fn create_requires_close_when_configured() {
    let settings = SessionSettings { on_existing: OnExisting::RequireClose, ..SessionSettings::default() };
    let mut fx = fixture_with(FakeBackend::default(), settings, |_| {});
    let c = &mut fx.controller;

    let first = c.create().unwrap();
    assert_eq!(c.create().unwrap_err(), SessionError::AlreadyOpen(first.clone()));

    c.close(&first).unwrap();
    let second = c.create().unwrap();
    assert_ne!(first, second);
    assert_eq!(c.session().unwrap().status(), SessionStatus::Created);
}

#[test]
fn idle_session_is_reclaimed() {
    let settings = SessionSettings { idle_timeout_secs: 60, ..SessionSettings::default() };
    let mut fx = fixture_with(FakeBackend::default(), settings, |_| {});
    let c = &mut fx.controller;

    c.create().unwrap();
    assert!(!c.reclaim_stale_at(Utc::now() + Duration::seconds(30)));
    assert!(c.reclaim_stale_at(Utc::now() + Duration::minutes(2)));

    assert_eq!(c.session().unwrap().status(), SessionStatus::Closed);
    assert_eq!(*backend(c).releases.borrow(), 1);
}

#[test]
fn missing_credential_fails_before_backend() {
    let dir = tempdir().unwrap();
    write_modules(dir.path());
    let registry = Arc::new(RegistryHandle::open(DataSource::new(dir.path())));
    let gateway = AnalysisGateway::new(
        FakeBackend::default(),
        CredentialChain::empty().explicit(None),
        RetryPolicy::never(),
    );
    let mut c = SessionController::new(gateway, registry, SessionSettings::default());

    assert!(matches!(c.create().unwrap_err(), SessionError::Configuration(_)));
    assert_eq!(*c.gateway().backend().sessions_created.borrow(), 0);
    assert!(c.session().is_none());
}
