//! REST implementation of [`Backend`].

use async_trait::async_trait;
use reqwest::{header, Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    Backend, ListFilter, ListPage, PublishRequest, RemoteRecord, RemoteTaskStatus, TaskHandle,
};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::model::EntityKind;
use crate::retry::{parse_retry_after, RetryConfig};
use crate::tasks::TaskKind;

/// Backend client over HTTP with bearer authentication.
///
/// Reads are retried on connection failures, timeouts and the configured
/// transient statuses. Writes are retried only when the request never
/// reached the server.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

#[derive(Deserialize)]
struct CreatedResponse {
    id: Uuid,
}

#[derive(Deserialize)]
struct AcceptedResponse {
    task_id: String,
}

impl HttpBackend {
    /// Create a client from backend settings.
    pub fn new(config: &BackendConfig, retry: RetryConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                BackendError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.collection())
    }

    fn entity_url(&self, kind: EntityKind, id: Uuid) -> String {
        format!("{}/{}/{}", self.base_url, kind.collection(), id)
    }

    /// Send a request, retrying transient failures.
    ///
    /// `idempotent` requests also retry on timeouts and transient statuses.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        idempotent: bool,
    ) -> Result<Response, BackendError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut request = self.client.request(method.clone(), url);
            if let Some(api_key) = &self.api_key {
                request = request.bearer_auth(api_key);
            }
            if let Some(json_body) = body {
                request = request.json(json_body);
            }

            debug!(url = %url, method = %method, attempt = attempt, "Sending backend request");

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    debug!(
                        url = %url,
                        status = %status,
                        attempt = attempt,
                        "Received backend response"
                    );

                    if idempotent
                        && self.retry.is_transient_status(status.as_u16())
                        && attempt <= self.retry.max_retries
                    {
                        let wait = if status == StatusCode::TOO_MANY_REQUESTS {
                            resp.headers()
                                .get(header::RETRY_AFTER)
                                .and_then(|v| v.to_str().ok())
                                .and_then(parse_retry_after)
                                .unwrap_or_else(|| self.retry.calculate_backoff(attempt))
                        } else {
                            self.retry.calculate_backoff(attempt)
                        };
                        warn!(
                            url = %url,
                            status = %status,
                            attempt = attempt,
                            wait_ms = wait.as_millis(),
                            "Transient backend status, retrying with backoff"
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    let err = BackendError::from(e);
                    let retryable = if idempotent {
                        err.is_retryable()
                    } else {
                        err.is_connect()
                    };
                    if retryable && attempt <= self.retry.max_retries {
                        let backoff = self.retry.calculate_backoff(attempt);
                        warn!(
                            url = %url,
                            error = %err,
                            attempt = attempt,
                            wait_ms = backoff.as_millis(),
                            "Backend request failed, retrying with backoff"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Map a non-success response to an error.
    async fn check(response: Response, resource: &str, id: &str) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND && !id.is_empty() {
            return Err(BackendError::not_found(resource, id));
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::rejected(status.as_u16(), error_message(&body)))
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for field in ["message", "error", "detail"] {
            if let Some(message) = json.get(field).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    body.to_string()
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, BackendError> {
    serde_json::to_value(value).map_err(|e| BackendError::Decode(e.to_string()))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list(&self, kind: EntityKind, filter: &ListFilter) -> Result<ListPage, BackendError> {
        let mut url = format!(
            "{}?limit={}&offset={}",
            self.collection_url(kind),
            filter.limit,
            filter.offset
        );
        if let Some(parent_id) = filter.parent_id {
            url.push_str(&format!("&parent_id={parent_id}"));
        }

        let response = self.send(Method::GET, &url, None, true).await?;
        let response = Self::check(response, kind.collection(), "").await?;
        let body: Value = response.json().await?;

        // Either a bare array or {items, total}.
        let page = match body {
            Value::Array(_) => ListPage {
                items: serde_json::from_value(body)
                    .map_err(|e| BackendError::Decode(e.to_string()))?,
                total: None,
            },
            other => serde_json::from_value(other)
                .map_err(|e| BackendError::Decode(e.to_string()))?,
        };
        Ok(page)
    }

    async fn get(&self, kind: EntityKind, id: Uuid) -> Result<RemoteRecord, BackendError> {
        let url = self.entity_url(kind, id);
        let response = self.send(Method::GET, &url, None, true).await?;
        let response = Self::check(response, &kind.to_string(), &id.to_string()).await?;
        Ok(response.json().await?)
    }

    async fn create(
        &self,
        kind: EntityKind,
        request: &PublishRequest,
    ) -> Result<Uuid, BackendError> {
        let url = self.collection_url(kind);
        let body = to_body(request)?;
        let response = self.send(Method::POST, &url, Some(&body), false).await?;
        let response = Self::check(response, &kind.to_string(), "").await?;
        let created: CreatedResponse = response.json().await?;
        Ok(created.id)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: Uuid,
        request: &PublishRequest,
    ) -> Result<(), BackendError> {
        let url = self.entity_url(kind, id);
        let body = to_body(request)?;
        let response = self.send(Method::PUT, &url, Some(&body), false).await?;
        Self::check(response, &kind.to_string(), &id.to_string()).await?;
        Ok(())
    }

    async fn deprecate(&self, kind: EntityKind, id: Uuid) -> Result<(), BackendError> {
        let url = format!("{}/deprecate", self.entity_url(kind, id));
        let response = self.send(Method::POST, &url, None, false).await?;
        Self::check(response, &kind.to_string(), &id.to_string()).await?;
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: Uuid) -> Result<(), BackendError> {
        let url = self.entity_url(kind, id);
        let response = self.send(Method::DELETE, &url, None, false).await?;
        Self::check(response, &kind.to_string(), &id.to_string()).await?;
        Ok(())
    }

    async fn submit_task(
        &self,
        kind: TaskKind,
        payload: &Value,
    ) -> Result<TaskHandle, BackendError> {
        let url = format!("{}/tasks/{}", self.base_url, kind.as_str());
        let response = self.send(Method::POST, &url, Some(payload), false).await?;
        let response = Self::check(response, "task", "").await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(BackendError::Decode(format!(
                "expected 202 Accepted for task submission, got {}",
                response.status()
            )));
        }
        let accepted: AcceptedResponse = response.json().await?;
        Ok(TaskHandle {
            task_id: accepted.task_id,
            kind,
        })
    }

    async fn task_status(&self, task_id: &str) -> Result<RemoteTaskStatus, BackendError> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        let response = self.send(Method::GET, &url, None, true).await?;
        let response = Self::check(response, "task", task_id).await?;
        Ok(response.json().await?)
    }
}
