//! Code example executors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::template::RenderedRequest;
use crate::error::ExampleError;
use crate::tasks::{TaskKind, TaskPoller};

/// What an upstream answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub status: u16,
    pub body: String,
}

impl ExecutionOutput {
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Hex SHA-256 over status and body.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.status.to_be_bytes());
        hasher.update(self.body.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Executes a rendered request against its target.
#[async_trait]
pub trait ExampleExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &RenderedRequest,
        timeout: Duration,
    ) -> Result<ExecutionOutput, ExampleError>;
}

/// Calls the upstream provider directly.
#[derive(Clone, Default)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExampleExecutor for HttpExecutor {
    async fn execute(
        &self,
        request: &RenderedRequest,
        timeout: Duration,
    ) -> Result<ExecutionOutput, ExampleError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ExampleError::InvalidRequest(format!("method '{}'", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let timeout_ms = timeout.as_millis() as u64;
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ExampleError::Timeout(timeout_ms)
            } else if e.is_builder() {
                ExampleError::InvalidRequest(e.to_string())
            } else {
                ExampleError::Execution(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ExampleError::Timeout(timeout_ms)
            } else {
                ExampleError::Execution(e.to_string())
            }
        })?;
        debug!(url = %request.url, status, "Example executed");

        Ok(ExecutionOutput { status, body })
    }
}

/// Runs examples on the backend through a `remote_test` task.
///
/// The task result must carry `status` and `body`. A body that is not a
/// string is kept as its JSON text.
#[derive(Clone)]
pub struct RemoteExecutor {
    poller: TaskPoller,
    cancel: CancellationToken,
}

impl RemoteExecutor {
    #[must_use]
    pub fn new(poller: TaskPoller) -> Self {
        Self {
            poller,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop waiting on in-flight tasks when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

fn output_from_result(result: &Value) -> Result<ExecutionOutput, ExampleError> {
    let status = result
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .ok_or_else(|| ExampleError::TaskFailed("task result has no status".to_string()))?;
    let body = match result.get("body") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Ok(ExecutionOutput { status, body })
}

#[async_trait]
impl ExampleExecutor for RemoteExecutor {
    async fn execute(
        &self,
        request: &RenderedRequest,
        timeout: Duration,
    ) -> Result<ExecutionOutput, ExampleError> {
        let payload = serde_json::to_value(request)
            .map_err(|e| ExampleError::InvalidRequest(e.to_string()))?;

        let cancel = self.cancel.child_token();
        let timeout_ms = timeout.as_millis() as u64;
        let report = tokio::time::timeout(
            timeout,
            self.poller.run(TaskKind::RemoteTest, &payload, &cancel),
        )
        .await
        .map_err(|_| {
            cancel.cancel();
            ExampleError::Timeout(timeout_ms)
        })?;

        let result = report
            .into_result()
            .map_err(|e| ExampleError::TaskFailed(e.to_string()))?;
        output_from_result(&result)
    }
}
