//! Catalog backend API
//!
//! The [`Backend`] trait is the engine's only view of remote state. The
//! [`HttpBackend`] implementation talks to the REST API; tests substitute an
//! in-memory implementation.

mod http;
mod snapshot;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::BackendError;
use crate::model::{EntityKind, NaturalKey};
use crate::tasks::TaskKind;

pub use http::HttpBackend;
pub use snapshot::fetch_snapshot;

/// Pagination and filtering for list calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    pub limit: u32,
    pub offset: u32,
    pub parent_id: Option<Uuid>,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            parent_id: None,
        }
    }
}

impl ListFilter {
    #[must_use]
    pub fn page(limit: u32, offset: u32) -> Self {
        Self {
            limit,
            offset,
            parent_id: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// An entity record as the backend returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// One page of a list call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPage {
    pub items: Vec<RemoteRecord>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Create/update request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRequest {
    /// Local identity, for logging and test doubles. Not sent.
    #[serde(skip)]
    pub key: NaturalKey,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub content_hash: String,
    pub document: Value,
}

impl PublishRequest {
    #[must_use]
    pub fn new(
        key: NaturalKey,
        parent_id: Option<Uuid>,
        content_hash: impl Into<String>,
        document: Value,
    ) -> Self {
        Self {
            name: key.name().to_string(),
            key,
            parent_id,
            content_hash: content_hash.into(),
            document,
        }
    }
}

/// Handle returned when the backend accepts a long-running task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: String,
    pub kind: TaskKind,
}

/// Task state as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteTaskState {
    #[serde(alias = "queued", alias = "submitted")]
    Pending,
    #[serde(alias = "in_progress", alias = "processing")]
    Running,
    #[serde(alias = "success", alias = "completed", alias = "done")]
    Succeeded,
    #[serde(alias = "error")]
    Failed,
    #[serde(alias = "cancelled")]
    Canceled,
}

impl RemoteTaskState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RemoteTaskState::Succeeded | RemoteTaskState::Failed | RemoteTaskState::Canceled
        )
    }
}

/// Body of the task status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTaskStatus {
    pub state: RemoteTaskState,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RemoteTaskStatus {
    #[must_use]
    pub fn pending() -> Self {
        Self {
            state: RemoteTaskState::Pending,
            result: None,
            error: None,
        }
    }

    #[must_use]
    pub fn running() -> Self {
        Self {
            state: RemoteTaskState::Running,
            ..Self::pending()
        }
    }

    #[must_use]
    pub fn succeeded(result: Value) -> Self {
        Self {
            state: RemoteTaskState::Succeeded,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: RemoteTaskState::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Remote catalog operations.
///
/// Every method is a single logical call; implementations own their retry
/// policy for transient failures.
#[async_trait]
pub trait Backend: Send + Sync {
    /// List one page of entities of `kind`.
    async fn list(&self, kind: EntityKind, filter: &ListFilter)
        -> Result<ListPage, BackendError>;

    /// List every entity of `kind`, draining pages of `page_size`.
    async fn list_all(
        &self,
        kind: EntityKind,
        page_size: u32,
    ) -> Result<Vec<RemoteRecord>, BackendError> {
        let page_size = page_size.max(1);
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .list(kind, &ListFilter::page(page_size, offset))
                .await?;
            let received = page.items.len() as u32;
            records.extend(page.items);
            offset += received;

            let exhausted = page.total.map_or(false, |total| u64::from(offset) >= total);
            if received < page_size || received == 0 || exhausted {
                return Ok(records);
            }
        }
    }

    /// Fetch one entity.
    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<RemoteRecord, BackendError>;

    /// Create an entity and return its backend id.
    async fn create(&self, kind: EntityKind, request: &PublishRequest)
        -> Result<Uuid, BackendError>;

    /// Replace an entity's document.
    async fn update(
        &self,
        kind: EntityKind,
        id: Uuid,
        request: &PublishRequest,
    ) -> Result<(), BackendError>;

    /// Mark an entity deprecated, keeping it readable.
    async fn deprecate(&self, kind: EntityKind, id: Uuid) -> Result<(), BackendError>;

    /// Remove an entity.
    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<(), BackendError>;

    /// Submit a long-running task. The backend answers 202 with a task id.
    async fn submit_task(&self, kind: TaskKind, payload: &Value)
        -> Result<TaskHandle, BackendError>;

    /// Current state of a submitted task.
    async fn task_status(&self, task_id: &str) -> Result<RemoteTaskStatus, BackendError>;
}
