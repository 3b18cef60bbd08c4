//! Submit-and-poll driver for backend tasks.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::state::{TaskKind, TaskReport, TaskState};
use crate::backend::{Backend, RemoteTaskState, TaskHandle};
use crate::config::PollConfig;

/// Drives tasks from submission to a terminal state.
///
/// Cancellation only stops the local wait; nothing is sent to the backend.
#[derive(Clone)]
pub struct TaskPoller {
    backend: Arc<dyn Backend>,
    config: PollConfig,
}

impl TaskPoller {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, config: PollConfig) -> Self {
        Self { backend, config }
    }

    #[must_use]
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Submit a task and wait for it to finish.
    #[instrument(skip(self, payload, cancel), fields(kind = %kind))]
    pub async fn run(
        &self,
        kind: TaskKind,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> TaskReport {
        let started = Instant::now();
        if cancel.is_cancelled() {
            let mut report = TaskReport::new(kind, None);
            report.transition(TaskState::Canceled);
            return report;
        }

        match self.backend.submit_task(kind, payload).await {
            Ok(handle) => {
                info!(task_id = %handle.task_id, "Task submitted");
                self.drive(handle, started, cancel).await
            }
            Err(e) => {
                warn!(error = %e, "Task submission failed");
                let mut report = TaskReport::new(kind, None);
                report.error = Some(e.to_string());
                report.transition(TaskState::Failed);
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                report
            }
        }
    }

    /// Wait for an already-submitted task.
    #[instrument(skip(self, handle, cancel), fields(task_id = %handle.task_id))]
    pub async fn wait(&self, handle: TaskHandle, cancel: &CancellationToken) -> TaskReport {
        self.drive(handle, Instant::now(), cancel).await
    }

    async fn drive(
        &self,
        handle: TaskHandle,
        started: Instant,
        cancel: &CancellationToken,
    ) -> TaskReport {
        let mut report = TaskReport::new(handle.kind, Some(handle.task_id.clone()));
        // No deadline when the configured wait does not fit in an Instant.
        let deadline = started.checked_add(self.config.max_wait());
        let mut transient_failures = 0u32;

        report.transition(TaskState::Polling);

        let final_state = loop {
            let now = Instant::now();
            let interval = self.config.interval(report.polls);
            let delay = match deadline {
                Some(deadline) if now >= deadline => break TaskState::TimedOut,
                Some(deadline) => interval.min(deadline - now),
                None => interval,
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => break TaskState::Canceled,
                () = tokio::time::sleep(delay) => {}
            }

            report.polls += 1;
            let status = tokio::select! {
                biased;
                () = cancel.cancelled() => break TaskState::Canceled,
                status = self.backend.task_status(&handle.task_id) => status,
            };

            match status {
                Ok(status) => {
                    transient_failures = 0;
                    debug!(poll = report.polls, state = ?status.state, "Task status");
                    match status.state {
                        RemoteTaskState::Succeeded => {
                            report.result = status.result;
                            break TaskState::Succeeded;
                        }
                        RemoteTaskState::Failed => {
                            report.error = Some(
                                status
                                    .error
                                    .unwrap_or_else(|| "task failed without detail".to_string()),
                            );
                            break TaskState::Failed;
                        }
                        RemoteTaskState::Canceled => {
                            report.error = Some("task was canceled by the backend".to_string());
                            break TaskState::Canceled;
                        }
                        RemoteTaskState::Pending | RemoteTaskState::Running => {}
                    }
                }
                Err(e) if e.is_retryable() => {
                    transient_failures += 1;
                    warn!(
                        poll = report.polls,
                        failures = transient_failures,
                        error = %e,
                        "Transient failure polling task"
                    );
                    if transient_failures > self.config.max_transient_failures {
                        report.error = Some(format!(
                            "giving up after {transient_failures} consecutive poll failures: {e}"
                        ));
                        break TaskState::Failed;
                    }
                }
                Err(e) => {
                    report.error = Some(e.to_string());
                    break TaskState::Failed;
                }
            }
        };

        report.transition(final_state);
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            task_id = %handle.task_id,
            state = %report.state,
            polls = report.polls,
            elapsed_ms = report.elapsed_ms,
            "Task finished"
        );
        report
    }
}
