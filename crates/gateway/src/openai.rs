//! OpenAI Assistants backend (blocking reqwest, no async runtime).
//!
//! A session is an assistant with the code interpreter tool plus one thread.
//! The [`SessionId`] is `"<assistant_id>/<thread_id>"`. Uploaded datasets are
//! attached to the thread's code interpreter file set; a query is a user
//! message followed by a run that is polled until it finishes.

use std::time::{Duration, Instant};

use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use restops_config::BackendSettings;

use crate::backend::{
    AnalysisBackend, Artifact, ArtifactKind, BackendReply, SessionId, UploadAck, UploadMetadata,
};
use crate::error::BackendError;
use crate::retry::CancelToken;

const USER_AGENT: &str = concat!("restops/", env!("CARGO_PKG_VERSION"));

const ASSISTANT_NAME: &str = "Restaurant Operations Data Analyst";

const ASSISTANT_INSTRUCTIONS: &str = "You are a data analyst for a restaurant. \
The attached CSV files hold the restaurant's operational data: menu, inventory, \
point-of-sale transactions, reservations, reviews, staff, vendors, loyalty members, \
accounting entries and marketing campaigns. Load them with the code interpreter \
before answering. Answer with concrete figures, name the files and columns you used, \
and create charts when a visual comparison helps.";

/// Status checks after a cancel before the thread is assumed blocked.
const SETTLE_POLLS: u32 = 20;

const RUN_INSTRUCTIONS: &str = "Answer the latest question using the uploaded files. \
If the data cannot answer it, say which data is missing.";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct CreateAssistant<'a> {
    name: &'a str,
    instructions: &'a str,
    model: &'a str,
    tools: Vec<ToolSpec>,
}

#[derive(Serialize)]
struct ToolSpec {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct CreateRun<'a> {
    assistant_id: &'a str,
    instructions: &'a str,
}

#[derive(Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Deserialize)]
struct ThreadObject {
    #[serde(default)]
    tool_resources: Option<ToolResources>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ToolResources {
    #[serde(default)]
    code_interpreter: Option<CodeInterpreterFiles>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CodeInterpreterFiles {
    #[serde(default)]
    file_ids: Vec<String>,
}

#[derive(Serialize)]
struct ModifyThread {
    tool_resources: ToolResources,
}

#[derive(Deserialize)]
struct RunObject {
    id: String,
    status: String,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Deserialize)]
struct RunError {
    code: String,
    message: String,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<MessageObject>,
}

#[derive(Deserialize)]
struct MessageObject {
    role: String,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: TextContent },
    ImageFile { image_file: FileRef },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct TextContent {
    value: String,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Annotation {
    FilePath { text: String, file_path: FileRef },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct FileRef {
    file_id: String,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// Backend
// ============================================================================

/// Whether a 404 means the session is gone or the endpoint is wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Global,
    Session,
}

pub struct OpenAiBackend {
    http: Client,
    api_base: String,
    model: String,
    poll_interval: Duration,
    run_timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| BackendError::Network(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            poll_interval: settings.run_poll_interval(),
            run_timeout: settings.run_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn send(&self, req: RequestBuilder, api_key: &str, scope: Scope) -> Result<Response, BackendError> {
        let resp = req
            .bearer_auth(api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .send()
            .map_err(network_error)?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = resp.text().unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        Err(classify_status(status, message, retry_after, scope))
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        api_key: &str,
        scope: Scope,
    ) -> Result<T, BackendError> {
        self.send(req, api_key, scope)?
            .json::<T>()
            .map_err(|e| BackendError::Protocol(e.to_string()))
    }

    fn delete(&self, path: &str, api_key: &str, scope: Scope) -> Result<(), BackendError> {
        self.send(self.http.delete(self.url(path)), api_key, scope).map(|_| ())
    }

    fn thread_files(&self, api_key: &str, thread: &str) -> Result<Vec<String>, BackendError> {
        let thread: ThreadObject = self.send_json(
            self.http.get(self.url(&format!("/threads/{thread}"))),
            api_key,
            Scope::Session,
        )?;
        Ok(thread
            .tool_resources
            .and_then(|r| r.code_interpreter)
            .map(|c| c.file_ids)
            .unwrap_or_default())
    }

    fn set_thread_files(&self, api_key: &str, thread: &str, file_ids: Vec<String>) -> Result<(), BackendError> {
        let body = ModifyThread {
            tool_resources: ToolResources {
                code_interpreter: Some(CodeInterpreterFiles { file_ids }),
            },
        };
        self.send(
            self.http.post(self.url(&format!("/threads/{thread}"))).json(&body),
            api_key,
            Scope::Session,
        )
        .map(|_| ())
    }

    fn cancel_run(&self, api_key: &str, thread: &str, run: &str) {
        let req = self.http.post(self.url(&format!("/threads/{thread}/runs/{run}/cancel")));
        if let Err(e) = self.send(req, api_key, Scope::Session) {
            log::warn!("could not cancel run {run}: {e}");
        }
    }

    /// Cancel `run` and wait until it stops. The thread rejects new messages
    /// while a run is still `cancelling`, so a retry must not start earlier.
    fn stop_run(&self, api_key: &str, thread: &str, run: &str) {
        self.cancel_run(api_key, thread, run);
        for _ in 0..SETTLE_POLLS {
            std::thread::sleep(self.poll_interval);
            let current: RunObject = match self.send_json(
                self.http.get(self.url(&format!("/threads/{thread}/runs/{run}"))),
                api_key,
                Scope::Session,
            ) {
                Ok(current) => current,
                Err(e) => {
                    log::warn!("could not check run {run} after cancel: {e}");
                    return;
                }
            };
            if !is_active(&current.status) {
                log::debug!("run {run} settled as {}", current.status);
                return;
            }
        }
        log::warn!("run {run} still active after {SETTLE_POLLS} checks");
    }

    /// Poll until the run leaves the queued/in-progress states.
    fn wait_for_run(
        &self,
        api_key: &str,
        thread: &str,
        mut run: RunObject,
        cancel: &CancelToken,
    ) -> Result<RunObject, BackendError> {
        let started = Instant::now();
        while is_active(&run.status) {
            if started.elapsed() >= self.run_timeout {
                self.stop_run(api_key, thread, &run.id);
                return Err(BackendError::Timeout(format!(
                    "run {} still {} after {}s",
                    run.id,
                    run.status,
                    self.run_timeout.as_secs()
                )));
            }
            if !cancel.sleep(self.poll_interval) {
                self.stop_run(api_key, thread, &run.id);
                return Err(BackendError::Cancelled);
            }
            run = self.send_json(
                self.http.get(self.url(&format!("/threads/{thread}/runs/{}", run.id))),
                api_key,
                Scope::Session,
            )?;
            log::debug!("run {} is {}", run.id, run.status);
        }
        Ok(run)
    }

    fn latest_reply(&self, api_key: &str, thread: &str, run: &str) -> Result<(String, Vec<Artifact>), BackendError> {
        let list: MessageList = self.send_json(
            self.http
                .get(self.url(&format!("/threads/{thread}/messages")))
                .query(&[("order", "desc"), ("limit", "1"), ("run_id", run)]),
            api_key,
            Scope::Session,
        )?;
        let message = list
            .data
            .into_iter()
            .find(|m| m.role == "assistant")
            .ok_or_else(|| BackendError::Protocol(format!("run {run} produced no assistant message")))?;
        Ok(collect_reply(message))
    }
}

impl AnalysisBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn create_session(&self, api_key: &str) -> Result<SessionId, BackendError> {
        let body = CreateAssistant {
            name: ASSISTANT_NAME,
            instructions: ASSISTANT_INSTRUCTIONS,
            model: &self.model,
            tools: vec![ToolSpec { kind: "code_interpreter" }],
        };
        let assistant: IdObject =
            self.send_json(self.http.post(self.url("/assistants")).json(&body), api_key, Scope::Global)?;

        let thread: IdObject = match self.send_json(
            self.http.post(self.url("/threads")).json(&serde_json::json!({})),
            api_key,
            Scope::Global,
        ) {
            Ok(t) => t,
            Err(e) => {
                if let Err(cleanup) = self.delete(&format!("/assistants/{}", assistant.id), api_key, Scope::Global) {
                    log::warn!("orphaned assistant {}: {}", assistant.id, cleanup);
                }
                return Err(e);
            }
        };

        Ok(SessionId::new(format!("{}/{}", assistant.id, thread.id)))
    }

    fn upload_data(
        &self,
        api_key: &str,
        session: &SessionId,
        blob: &[u8],
        meta: &UploadMetadata,
    ) -> Result<UploadAck, BackendError> {
        let (_, thread) = split_session(session)?;

        let part = multipart::Part::bytes(blob.to_vec())
            .file_name(meta.file_name.clone())
            .mime_str("text/csv")
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        let form = multipart::Form::new().text("purpose", "assistants").part("file", part);
        let file: IdObject =
            self.send_json(self.http.post(self.url("/files")).multipart(form), api_key, Scope::Global)?;

        let attach = self.thread_files(api_key, thread).and_then(|mut ids| {
            ids.retain(|id| Some(id) != meta.replaces.as_ref() && *id != file.id);
            ids.push(file.id.clone());
            self.set_thread_files(api_key, thread, ids)
        });
        if let Err(e) = attach {
            if let Err(cleanup) = self.delete(&format!("/files/{}", file.id), api_key, Scope::Global) {
                log::warn!("orphaned file {}: {}", file.id, cleanup);
            }
            return Err(e);
        }

        if let Some(old) = &meta.replaces {
            if let Err(e) = self.delete(&format!("/files/{old}"), api_key, Scope::Global) {
                log::warn!("could not delete replaced file {old}: {e}");
            }
        }

        Ok(UploadAck { file_id: file.id })
    }

    fn submit_query(
        &self,
        api_key: &str,
        session: &SessionId,
        text: &str,
        cancel: &CancelToken,
    ) -> Result<BackendReply, BackendError> {
        let (assistant, thread) = split_session(session)?;

        self.send(
            self.http
                .post(self.url(&format!("/threads/{thread}/messages")))
                .json(&CreateMessage { role: "user", content: text }),
            api_key,
            Scope::Session,
        )?;

        let run: RunObject = self.send_json(
            self.http
                .post(self.url(&format!("/threads/{thread}/runs")))
                .json(&CreateRun { assistant_id: assistant, instructions: RUN_INSTRUCTIONS }),
            api_key,
            Scope::Session,
        )?;

        let run = self.wait_for_run(api_key, thread, run, cancel)?;
        match run.status.as_str() {
            "completed" => {
                let (text, artifacts) = self.latest_reply(api_key, thread, &run.id)?;
                Ok(BackendReply { text, artifacts, success: true })
            }
            "incomplete" => {
                let (text, artifacts) = self.latest_reply(api_key, thread, &run.id)?;
                Ok(BackendReply { text, artifacts, success: false })
            }
            "failed" => run_failure(run.last_error),
            "expired" => Err(BackendError::Timeout(format!("run {} expired", run.id))),
            "cancelled" => Ok(BackendReply {
                text: "The analysis run was cancelled.".to_string(),
                artifacts: Vec::new(),
                success: false,
            }),
            other => {
                self.cancel_run(api_key, thread, &run.id);
                Err(BackendError::Protocol(format!("run {} ended in unexpected state '{other}'", run.id)))
            }
        }
    }

    fn release_session(&self, api_key: &str, session: &SessionId) -> Result<(), BackendError> {
        let (assistant, thread) = split_session(session)?;
        let thread_result = self.delete(&format!("/threads/{thread}"), api_key, Scope::Session);
        let assistant_result = self.delete(&format!("/assistants/{assistant}"), api_key, Scope::Session);
        thread_result.and(assistant_result)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn is_active(status: &str) -> bool {
    matches!(status, "queued" | "in_progress" | "cancelling")
}

fn split_session(session: &SessionId) -> Result<(&str, &str), BackendError> {
    session
        .as_str()
        .split_once('/')
        .filter(|(a, t)| !a.is_empty() && !t.is_empty())
        .ok_or_else(|| BackendError::SessionNotFound(format!("malformed session id '{session}'")))
}

fn network_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(e.to_string())
    } else {
        BackendError::Network(e.to_string())
    }
}

/// Map a non-success HTTP status to a backend error.
fn classify_status(status: u16, message: String, retry_after: Option<Duration>, scope: Scope) -> BackendError {
    match status {
        401 | 403 => BackendError::Unauthorized { status, message },
        404 if scope == Scope::Session => BackendError::SessionNotFound(message),
        429 => BackendError::RateLimited { retry_after },
        500..=599 => BackendError::Upstream { status, message },
        _ => BackendError::BadRequest { status, message },
    }
}

fn run_failure(error: Option<RunError>) -> Result<BackendReply, BackendError> {
    match error {
        Some(e) if e.code == "rate_limit_exceeded" => Err(BackendError::RateLimited { retry_after: None }),
        Some(e) if e.code == "server_error" => Err(BackendError::Upstream { status: 500, message: e.message }),
        Some(e) => Ok(BackendReply {
            text: e.message,
            artifacts: Vec::new(),
            success: false,
        }),
        None => Ok(BackendReply {
            text: "The analysis run failed.".to_string(),
            artifacts: Vec::new(),
            success: false,
        }),
    }
}

fn collect_reply(message: MessageObject) -> (String, Vec<Artifact>) {
    let mut texts = Vec::new();
    let mut artifacts = Vec::new();

    for part in message.content {
        match part {
            ContentPart::Text { text } => {
                for annotation in text.annotations {
                    if let Annotation::FilePath { text, file_path } = annotation {
                        artifacts.push(Artifact {
                            kind: ArtifactKind::File,
                            file_id: file_path.file_id,
                            name: Some(text),
                        });
                    }
                }
                texts.push(text.value);
            }
            ContentPart::ImageFile { image_file } => artifacts.push(Artifact {
                kind: ArtifactKind::Image,
                file_id: image_file.file_id,
                name: None,
            }),
            ContentPart::Other => {}
        }
    }

    (texts.join("\n\n"), artifacts)
}
