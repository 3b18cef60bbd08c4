//! Async task poller tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_test_logging, Call, RecordingBackend, ScriptedStatus};
use serde_json::json;
use svcsync_engine::testing::{ExampleExecutor, ExecutionOutput, RenderedRequest};
use svcsync_engine::{
    PollConfig, RemoteExecutor, RemoteTaskStatus, TaskError, TaskKind, TaskPoller, TaskState,
};
use tokio_util::sync::CancellationToken;

fn poller(backend: &Arc<RecordingBackend>, config: PollConfig) -> TaskPoller {
    TaskPoller::new(backend.clone(), config)
}

fn fast() -> PollConfig {
    PollConfig::fixed(10, 2_000)
}

#[tokio::test]
async fn test_task_runs_to_success() {
    init_test_logging();
    let backend = Arc::new(RecordingBackend::new());
    backend.script([
        ScriptedStatus::Status(RemoteTaskStatus::pending()),
        ScriptedStatus::Status(RemoteTaskStatus::running()),
        ScriptedStatus::Status(RemoteTaskStatus::succeeded(json!({"invoice_id": "inv-1"}))),
    ]);

    let report = poller(&backend, fast())
        .run(
            TaskKind::InvoiceGeneration,
            &json!({"period": "2024-05"}),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.state, TaskState::Succeeded);
    assert_eq!(report.task_id.as_deref(), Some("task-1"));
    assert_eq!(report.polls, 3);
    let states: Vec<(TaskState, TaskState)> =
        report.transitions.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        states,
        vec![
            (TaskState::Submitted, TaskState::Polling),
            (TaskState::Polling, TaskState::Succeeded),
        ]
    );
    assert_eq!(report.into_result().unwrap()["invoice_id"], "inv-1");
    assert_eq!(backend.submitted_payloads(), vec![json!({"period": "2024-05"})]);
}

#[tokio::test]
async fn test_backend_failure_is_surfaced_without_retry() {
    let backend = Arc::new(RecordingBackend::new());
    backend.script([
        ScriptedStatus::Status(RemoteTaskStatus::running()),
        ScriptedStatus::Status(RemoteTaskStatus::failed("wallet ledger locked")),
    ]);

    let report = poller(&backend, fast())
        .run(TaskKind::WalletReconciliation, &json!({}), &CancellationToken::new())
        .await;
    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(report.polls, 2);

    let submits = backend
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Submit(_)))
        .count();
    assert_eq!(submits, 1);

    match report.into_result() {
        Err(TaskError::Failed { message, .. }) => assert_eq!(message, "wallet ledger locked"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_is_distinct_from_failure() {
    let backend = Arc::new(RecordingBackend::new());

    let report = poller(&backend, PollConfig::fixed(10, 100))
        .run(TaskKind::StatementGeneration, &json!({}), &CancellationToken::new())
        .await;
    assert_eq!(report.state, TaskState::TimedOut);
    assert!(report.polls >= 1);
    assert!(matches!(
        report.into_result(),
        Err(TaskError::TimedOut { .. })
    ));
}

#[tokio::test]
async fn test_cancellation_stops_polling_locally() {
    let backend = Arc::new(RecordingBackend::new());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = poller(&backend, fast())
        .run(TaskKind::InvoiceGeneration, &json!({}), &cancel)
        .await;
    assert_eq!(report.state, TaskState::Canceled);

    let polls_at_cancel = backend.calls().len();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.calls().len(), polls_at_cancel);
    assert!(backend
        .calls()
        .iter()
        .all(|c| matches!(c, Call::Submit(_) | Call::Status(_))));
}

#[tokio::test]
async fn test_cancelled_before_submission_never_submits() {
    let backend = Arc::new(RecordingBackend::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = poller(&backend, fast())
        .run(TaskKind::RemoteTest, &json!({}), &cancel)
        .await;
    assert_eq!(report.state, TaskState::Canceled);
    assert!(report.task_id.is_none());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_transient_poll_failures_are_retried() {
    let backend = Arc::new(RecordingBackend::new());
    backend.script([
        ScriptedStatus::Transient,
        ScriptedStatus::Transient,
        ScriptedStatus::Status(RemoteTaskStatus::succeeded(json!(null))),
    ]);

    let report = poller(&backend, fast().with_max_transient_failures(3))
        .run(TaskKind::InvoiceGeneration, &json!({}), &CancellationToken::new())
        .await;
    assert_eq!(report.state, TaskState::Succeeded);
    assert_eq!(report.polls, 3);
}

#[tokio::test]
async fn test_too_many_transient_failures_fail_the_task() {
    let backend = Arc::new(RecordingBackend::new());
    backend.script((0..5).map(|_| ScriptedStatus::Transient));

    let report = poller(&backend, fast().with_max_transient_failures(2))
        .run(TaskKind::InvoiceGeneration, &json!({}), &CancellationToken::new())
        .await;
    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(report.polls, 3);
    assert!(report.error.as_deref().unwrap().contains("consecutive"));
}

#[tokio::test]
async fn test_non_transient_poll_error_fails_immediately() {
    let backend = Arc::new(RecordingBackend::new());
    backend.script([ScriptedStatus::Fatal(404)]);

    let report = poller(&backend, fast())
        .run(TaskKind::InvoiceGeneration, &json!({}), &CancellationToken::new())
        .await;
    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(report.polls, 1);
}

#[tokio::test]
async fn test_rejected_submission_fails_without_task_id() {
    let backend = Arc::new(RecordingBackend::new());
    backend.reject_submissions(400);

    let report = poller(&backend, fast())
        .run(TaskKind::InvoiceGeneration, &json!({}), &CancellationToken::new())
        .await;
    assert_eq!(report.state, TaskState::Failed);
    assert!(report.task_id.is_none());
    assert_eq!(report.polls, 0);
    assert!(report.error.as_deref().unwrap().contains("400"));
}

#[tokio::test]
async fn test_remote_executor_reads_task_result() {
    let backend = Arc::new(RecordingBackend::new());
    backend.script([
        ScriptedStatus::Status(RemoteTaskStatus::running()),
        ScriptedStatus::Status(RemoteTaskStatus::succeeded(
            json!({"status": 200, "body": "{\"ok\":true}"}),
        )),
    ]);
    let executor = RemoteExecutor::new(poller(&backend, fast()));
    let request = RenderedRequest {
        method: "GET".into(),
        url: "https://api.example.com/v1/models".into(),
        headers: Default::default(),
        body: None,
    };

    let output = executor
        .execute(&request, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(output, ExecutionOutput::new(200, "{\"ok\":true}"));
    assert_eq!(
        backend.submitted_payloads()[0]["url"],
        "https://api.example.com/v1/models"
    );
    assert!(backend.calls().contains(&Call::Submit(TaskKind::RemoteTest)));
}

#[tokio::test]
async fn test_remote_executor_reports_task_failure() {
    let backend = Arc::new(RecordingBackend::new());
    backend.script([ScriptedStatus::Status(RemoteTaskStatus::failed(
        "upstream unreachable",
    ))]);
    let executor = RemoteExecutor::new(poller(&backend, fast()));
    let request = RenderedRequest {
        method: "POST".into(),
        url: "https://api.example.com/v1/chat".into(),
        headers: Default::default(),
        body: Some(json!({"model": "x"})),
    };

    let err = executor
        .execute(&request, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("upstream unreachable"));
}

#[tokio::test]
async fn test_unbounded_max_wait_still_polls_to_completion() {
    let backend = Arc::new(RecordingBackend::new());
    backend.script([
        ScriptedStatus::Status(RemoteTaskStatus::running()),
        ScriptedStatus::Status(RemoteTaskStatus::succeeded(json!({"ok": true}))),
    ]);

    let report = poller(&backend, PollConfig::fixed(10, u64::MAX))
        .run(TaskKind::WalletReconciliation, &json!({}), &CancellationToken::new())
        .await;
    assert_eq!(report.state, TaskState::Succeeded);
    assert_eq!(report.polls, 2);
}
