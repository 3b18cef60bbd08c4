//! Task states and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Long-running backend operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    InvoiceGeneration,
    StatementGeneration,
    RemoteTest,
    WalletReconciliation,
}

impl TaskKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::InvoiceGeneration => "invoice_generation",
            TaskKind::StatementGeneration => "statement_generation",
            TaskKind::RemoteTest => "remote_test",
            TaskKind::WalletReconciliation => "wallet_reconciliation",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-visible task lifecycle.
///
/// ```text
/// submitted ──► polling ──► succeeded
///     │            ├──────► failed
///     │            ├──────► timed_out
///     └────────────┴──────► canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    Polling,
    Succeeded,
    Failed,
    /// The wait budget ran out. The task may still finish server-side.
    TimedOut,
    Canceled,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::TimedOut | TaskState::Canceled
        )
    }

    #[must_use]
    pub fn can_transition_to(self, next: TaskState) -> bool {
        match self {
            TaskState::Submitted => matches!(
                next,
                TaskState::Polling | TaskState::Failed | TaskState::TimedOut | TaskState::Canceled
            ),
            TaskState::Polling => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Submitted => write!(f, "submitted"),
            TaskState::Polling => write!(f, "polling"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::TimedOut => write!(f, "timed_out"),
            TaskState::Canceled => write!(f, "canceled"),
        }
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTransition {
    pub from: TaskState,
    pub to: TaskState,
    pub at: DateTime<Utc>,
}

/// Terminal task outcomes other than success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The backend reported the task failed, or polling could not continue.
    #[error("Task {task_id} failed: {message}")]
    Failed { task_id: String, message: String },

    #[error("Task {task_id} did not finish within {waited_ms}ms")]
    TimedOut { task_id: String, waited_ms: u64 },

    #[error("Task {task_id} was canceled")]
    Canceled { task_id: String },
}

/// Everything observed while driving one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    /// Missing when submission itself failed.
    pub task_id: Option<String>,
    pub kind: TaskKind,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub polls: u32,
    pub transitions: Vec<TaskTransition>,
    pub elapsed_ms: u64,
}

impl TaskReport {
    pub(crate) fn new(kind: TaskKind, task_id: Option<String>) -> Self {
        Self {
            task_id,
            kind,
            state: TaskState::Submitted,
            result: None,
            error: None,
            polls: 0,
            transitions: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// Move to `next`, recording the transition. Illegal moves are ignored.
    pub(crate) fn transition(&mut self, next: TaskState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.transitions.push(TaskTransition {
            from: self.state,
            to: next,
            at: Utc::now(),
        });
        self.state = next;
        true
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == TaskState::Succeeded
    }

    /// The task result, or the reason there is none.
    pub fn into_result(self) -> Result<Value, TaskError> {
        let task_id = self.task_id.unwrap_or_default();
        match self.state {
            TaskState::Succeeded => Ok(self.result.unwrap_or(Value::Null)),
            TaskState::TimedOut => Err(TaskError::TimedOut {
                task_id,
                waited_ms: self.elapsed_ms,
            }),
            TaskState::Canceled => Err(TaskError::Canceled { task_id }),
            TaskState::Failed | TaskState::Submitted | TaskState::Polling => {
                Err(TaskError::Failed {
                    task_id,
                    message: self
                        .error
                        .unwrap_or_else(|| format!("task ended in state {}", self.state)),
                })
            }
        }
    }
}
