//! Integration test helpers for svcsync-engine.
//!
//! Provides an on-disk catalog builder, an in-memory backend that records
//! every call, and a scripted example executor.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use svcsync_engine::testing::{ExampleExecutor, ExecutionOutput, RenderedRequest};
use svcsync_engine::{
    Backend, BackendError, EntityKind, ExampleError, ListFilter, ListPage, PublishRequest,
    RemoteRecord, RemoteTaskStatus, TaskHandle, TaskKind,
};
use tempfile::TempDir;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

// ---------------------------------------------------------------------------
// Catalog fixtures
// ---------------------------------------------------------------------------

/// A catalog directory in a temp dir.
pub struct Catalog {
    dir: TempDir,
}

impl Catalog {
    /// Create a catalog holding only a seller document.
    pub fn new(seller: &str) -> Self {
        let catalog = Self {
            dir: TempDir::new().expect("create temp dir"),
        };
        catalog.write(
            "seller.json",
            &json!({"schema": "seller_v1", "name": seller, "display_name": "Acme Corp"}),
        );
        catalog
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, value: &Value) {
        let text = serde_json::to_string_pretty(value).expect("serialize fixture");
        self.write_raw(rel, &text);
    }

    pub fn write_raw(&self, rel: &str, text: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dir");
        }
        std::fs::write(path, text).expect("write fixture");
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.dir.path().join(rel)).expect("remove fixture");
    }

    /// `<provider>/provider.json`
    pub fn provider(&self, name: &str) -> &Self {
        self.write(
            &format!("{name}/provider.json"),
            &json!({"schema": "provider_v1", "name": name}),
        );
        self
    }

    /// `<provider>/<name>/offering.json`, with `extra` merged over defaults.
    pub fn offering(&self, provider: &str, name: &str, extra: Value) -> &Self {
        let mut doc = offering_doc(name, "https://api.example.com/v1");
        merge(&mut doc, extra);
        self.write(&format!("{provider}/{name}/offering.json"), &doc);
        self
    }

    /// `<provider>/<offering>/<name>.json`
    pub fn listing(&self, provider: &str, offering: &str, name: &str, extra: Value) -> &Self {
        let mut doc = json!({"schema": "listing_v1", "pricing": {"input": "1.00"}});
        merge(&mut doc, extra);
        self.write(&format!("{provider}/{offering}/{name}.json"), &doc);
        self
    }
}

/// A minimal valid offering document.
pub fn offering_doc(name: &str, base_url: &str) -> Value {
    json!({
        "schema": "offering_v1",
        "name": name,
        "service_type": "llm",
        "pricing": {"input": "2.50", "output": "10.00"},
        "upstream_access": {"base_url": base_url, "api_key": "sk-fixture"},
    })
}

/// A code example posting to `/chat/completions`.
pub fn chat_example(title: &str) -> Value {
    json!({
        "title": title,
        "template": {
            "method": "POST",
            "path": "/chat/completions",
            "headers": {"Authorization": "Bearer {{ api_key }}"},
            "body": {"model": "{{ model }}", "messages": [{"role": "user", "content": title}]},
        },
    })
}

fn merge(base: &mut Value, extra: Value) {
    if let (Value::Object(base), Value::Object(extra)) = (base, extra) {
        base.extend(extra);
    }
}

// ---------------------------------------------------------------------------
// Recording backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List(EntityKind),
    Get(EntityKind, Uuid),
    Create(EntityKind, String),
    Update(EntityKind, Uuid, String),
    Deprecate(EntityKind, Uuid),
    Delete(EntityKind, Uuid),
    Submit(TaskKind),
    Status(String),
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Call::Create(..) | Call::Update(..) | Call::Deprecate(..) | Call::Delete(..)
        )
    }
}

/// One scripted answer of the task status endpoint.
pub enum ScriptedStatus {
    Status(RemoteTaskStatus),
    Transient,
    Fatal(u16),
}

#[derive(Default)]
struct BackendState {
    records: Vec<(EntityKind, RemoteRecord)>,
    calls: Vec<Call>,
    rejected: HashMap<String, u16>,
    statuses: VecDeque<ScriptedStatus>,
    submit_rejection: Option<u16>,
    payloads: Vec<Value>,
    tasks: u32,
}

/// In-memory backend that records every call.
#[derive(Default)]
pub struct RecordingBackend {
    state: Mutex<BackendState>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject creates and updates of entities named `name`.
    pub fn reject(&self, name: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .rejected
            .insert(name.to_string(), status);
    }

    pub fn reject_submissions(&self, status: u16) {
        self.state.lock().unwrap().submit_rejection = Some(status);
    }

    /// Seed a remote record.
    pub fn insert(
        &self,
        kind: EntityKind,
        name: &str,
        parent_id: Option<Uuid>,
        content_hash: &str,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().records.push((
            kind,
            RemoteRecord {
                id,
                name: name.to_string(),
                parent_id,
                content_hash: content_hash.to_string(),
                status: None,
            },
        ));
        id
    }

    pub fn records(&self, kind: EntityKind) -> Vec<RemoteRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn find(&self, kind: EntityKind, name: &str) -> Option<RemoteRecord> {
        self.records(kind).into_iter().find(|r| r.name == name)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn script(&self, statuses: impl IntoIterator<Item = ScriptedStatus>) {
        self.state.lock().unwrap().statuses.extend(statuses);
    }

    pub fn submitted_payloads(&self) -> Vec<Value> {
        self.state.lock().unwrap().payloads.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn check_rejected(&self, name: &str) -> Result<(), BackendError> {
        match self.state.lock().unwrap().rejected.get(name) {
            Some(status) => Err(BackendError::rejected(*status, format!("{name} rejected"))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn list(&self, kind: EntityKind, filter: &ListFilter) -> Result<ListPage, BackendError> {
        self.record(Call::List(kind));
        let matching: Vec<RemoteRecord> = self
            .records(kind)
            .into_iter()
            .filter(|r| filter.parent_id.map_or(true, |p| r.parent_id == Some(p)))
            .collect();
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect();
        Ok(ListPage {
            items,
            total: Some(total),
        })
    }

    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<RemoteRecord, BackendError> {
        self.record(Call::Get(kind, id));
        self.records(kind)
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| BackendError::not_found(kind.to_string(), id.to_string()))
    }

    async fn create(
        &self,
        kind: EntityKind,
        request: &PublishRequest,
    ) -> Result<Uuid, BackendError> {
        self.record(Call::Create(kind, request.name.clone()));
        self.check_rejected(&request.name)?;
        Ok(self.insert(kind, &request.name, request.parent_id, &request.content_hash))
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: Uuid,
        request: &PublishRequest,
    ) -> Result<(), BackendError> {
        self.record(Call::Update(kind, id, request.name.clone()));
        self.check_rejected(&request.name)?;
        let mut state = self.state.lock().unwrap();
        let record = state
            .records
            .iter_mut()
            .find(|(k, r)| *k == kind && r.id == id)
            .map(|(_, r)| r)
            .ok_or_else(|| BackendError::not_found(kind.to_string(), id.to_string()))?;
        record.name = request.name.clone();
        record.content_hash = request.content_hash.clone();
        record.parent_id = request.parent_id;
        Ok(())
    }

    async fn deprecate(&self, kind: EntityKind, id: Uuid) -> Result<(), BackendError> {
        self.record(Call::Deprecate(kind, id));
        let mut state = self.state.lock().unwrap();
        match state.records.iter_mut().find(|(k, r)| *k == kind && r.id == id) {
            Some((_, record)) => {
                record.status = Some("deprecated".to_string());
                Ok(())
            }
            None => Err(BackendError::not_found(kind.to_string(), id.to_string())),
        }
    }

    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<(), BackendError> {
        self.record(Call::Delete(kind, id));
        let mut state = self.state.lock().unwrap();
        let before = state.records.len();
        state.records.retain(|(k, r)| !(*k == kind && r.id == id));
        if state.records.len() == before {
            return Err(BackendError::not_found(kind.to_string(), id.to_string()));
        }
        Ok(())
    }

    async fn submit_task(
        &self,
        kind: TaskKind,
        payload: &Value,
    ) -> Result<TaskHandle, BackendError> {
        self.record(Call::Submit(kind));
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.submit_rejection {
            return Err(BackendError::rejected(status, "task rejected"));
        }
        state.payloads.push(payload.clone());
        state.tasks += 1;
        Ok(TaskHandle {
            task_id: format!("task-{}", state.tasks),
            kind,
        })
    }

    async fn task_status(&self, task_id: &str) -> Result<RemoteTaskStatus, BackendError> {
        self.record(Call::Status(task_id.to_string()));
        let next = self.state.lock().unwrap().statuses.pop_front();
        match next {
            Some(ScriptedStatus::Status(status)) => Ok(status),
            Some(ScriptedStatus::Transient) => Err(BackendError::network("connection reset", false)),
            Some(ScriptedStatus::Fatal(status)) => {
                Err(BackendError::rejected(status, "task status unavailable"))
            }
            None => Ok(RemoteTaskStatus::pending()),
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted executor
// ---------------------------------------------------------------------------

/// Executor answering from a table of URL fragments. Unmatched requests get
/// `200 ok`.
#[derive(Default)]
pub struct FakeExecutor {
    responses: Vec<(String, Result<ExecutionOutput, ExampleError>)>,
    /// Failures returned before `responses` apply, counted down per call.
    failures: Mutex<Vec<(String, usize, ExampleError)>>,
    requests: Mutex<Vec<RenderedRequest>>,
    delay: Duration,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, fragment: &str, status: u16, body: &str) -> Self {
        self.responses
            .push((fragment.to_string(), Ok(ExecutionOutput::new(status, body))));
        self
    }

    pub fn fail(mut self, fragment: &str, error: ExampleError) -> Self {
        self.responses.push((fragment.to_string(), Err(error)));
        self
    }

    /// Fail the first `times` matching calls with `error`.
    pub fn fail_first(self, fragment: &str, times: usize, error: ExampleError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .push((fragment.to_string(), times, error));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<RenderedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests whose body mentions `text`.
    pub fn calls_mentioning(&self, text: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.body.as_ref().is_some_and(|b| b.to_string().contains(text)))
            .count()
    }
}

#[async_trait]
impl ExampleExecutor for FakeExecutor {
    async fn execute(
        &self,
        request: &RenderedRequest,
        _timeout: Duration,
    ) -> Result<ExecutionOutput, ExampleError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let haystack = format!(
            "{} {}",
            request.url,
            request.body.as_ref().map(Value::to_string).unwrap_or_default()
        );
        if let Some((_, remaining, error)) = self
            .failures
            .lock()
            .unwrap()
            .iter_mut()
            .find(|(fragment, remaining, _)| *remaining > 0 && haystack.contains(fragment.as_str()))
        {
            *remaining -= 1;
            return Err(error.clone());
        }
        self.responses
            .iter()
            .find(|(fragment, _)| haystack.contains(fragment.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| Ok(ExecutionOutput::new(200, "ok")))
    }
}
