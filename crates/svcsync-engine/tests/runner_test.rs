//! Test runner tests: caching, skipping, fail-fast, concurrency.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{chat_example, init_test_logging, Catalog, FakeExecutor};
use serde_json::json;
use svcsync_engine::testing::{CacheEntry, TestCacheStore};
use svcsync_engine::{
    load_catalog, Backoff, ExampleError, FileTestCache, MemoryTestCache, NaturalKey,
    ReportedOutcome, RunnerConfig, Scope, TestOutcome, TestRunner,
};

fn runner(
    executor: &Arc<FakeExecutor>,
    cache: &Arc<dyn TestCacheStore>,
    config: RunnerConfig,
) -> TestRunner {
    TestRunner::new(executor.clone(), cache.clone(), config).with_env(|name| match name {
        "OPENAI_KEY" => Some("sk-live".to_string()),
        _ => None,
    })
}

fn memory_cache() -> Arc<dyn TestCacheStore> {
    Arc::new(MemoryTestCache::new())
}

fn two_offerings() -> Catalog {
    let catalog = Catalog::new("acme");
    catalog
        .provider("openai")
        .offering(
            "openai",
            "a-model",
            json!({"code_examples": [chat_example("first")]}),
        )
        .offering(
            "openai",
            "b-model",
            json!({"code_examples": [chat_example("second")]}),
        );
    catalog
}

fn key(offering: &str, title: &str) -> NaturalKey {
    NaturalKey::example("openai", offering, None, title)
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    init_test_logging();
    let catalog = two_offerings();
    let graph = load_catalog(catalog.root()).unwrap();
    let executor = Arc::new(FakeExecutor::new());
    let cache = memory_cache();

    let first = runner(&executor, &cache, RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;
    assert!(first.passed());
    assert_eq!(first.count(ReportedOutcome::Pass), 2);
    assert_eq!(first.cached(), 0);
    assert_eq!(executor.call_count(), 2);

    let second = runner(&executor, &cache, RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;
    assert_eq!(executor.call_count(), 2);
    assert_eq!(second.cached(), 2);
    assert_eq!(second.count(ReportedOutcome::Pass), 2);
}

#[tokio::test]
async fn test_changed_example_misses_cache() {
    let catalog = two_offerings();
    let executor = Arc::new(FakeExecutor::new());
    let cache = memory_cache();
    let graph = load_catalog(catalog.root()).unwrap();
    runner(&executor, &cache, RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;

    let mut changed = chat_example("first");
    changed["template"]["body"]["temperature"] = json!(0.2);
    catalog.offering("openai", "a-model", json!({"code_examples": [changed]}));
    let graph = load_catalog(catalog.root()).unwrap();

    let report = runner(&executor, &cache, RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;
    assert_eq!(executor.call_count(), 3);
    assert!(!report.get(&key("a-model", "first")).unwrap().cached);
    assert!(report.get(&key("b-model", "second")).unwrap().cached);
}

#[tokio::test]
async fn test_force_reexecutes() {
    let catalog = two_offerings();
    let graph = load_catalog(catalog.root()).unwrap();
    let executor = Arc::new(FakeExecutor::new());
    let cache = memory_cache();
    runner(&executor, &cache, RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;

    let report = runner(&executor, &cache, RunnerConfig::default().with_force(true))
        .run(&graph, &Scope::all())
        .await;
    assert_eq!(executor.call_count(), 4);
    assert_eq!(report.cached(), 0);
}

#[tokio::test]
async fn test_skip_flag_and_connectivity_invariant() {
    let catalog = Catalog::new("acme");
    let mut skipped = chat_example("skipped");
    skipped["skip"] = json!(true);
    let mut health = chat_example("health");
    health["skip"] = json!(true);
    health["kind"] = json!("connectivity");
    catalog
        .provider("openai")
        .offering("openai", "a-model", json!({"code_examples": [skipped, health]}));
    let graph = load_catalog(catalog.root()).unwrap();
    let executor = Arc::new(FakeExecutor::new());

    let report = runner(&executor, &memory_cache(), RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;
    assert_eq!(
        report.get(&key("a-model", "skipped")).unwrap().outcome,
        ReportedOutcome::Skipped
    );
    assert_eq!(
        report.get(&key("a-model", "health")).unwrap().outcome,
        ReportedOutcome::Pass
    );
    assert_eq!(executor.call_count(), 1);
    assert!(report.passed());

    let forced = runner(&executor, &memory_cache(), RunnerConfig::default().with_force(true))
        .run(&graph, &Scope::all())
        .await;
    assert_eq!(forced.count(ReportedOutcome::Pass), 2);
}

#[tokio::test]
async fn test_fail_fast_stops_unstarted_examples() {
    init_test_logging();
    let catalog = two_offerings();
    let graph = load_catalog(catalog.root()).unwrap();
    let executor = Arc::new(FakeExecutor::new().respond("a-model", 500, "boom"));
    let cache = memory_cache();
    let config = RunnerConfig::default().with_workers(1).with_fail_fast(true);

    let report = runner(&executor, &cache, config).run(&graph, &Scope::all()).await;
    assert!(!report.passed());
    assert_eq!(
        report.get(&key("a-model", "first")).unwrap().outcome,
        ReportedOutcome::Fail
    );
    assert_eq!(
        report.get(&key("b-model", "second")).unwrap().outcome,
        ReportedOutcome::NotRun
    );
    assert_eq!(executor.calls_mentioning("b-model"), 0);
    assert_eq!(cache.entries().unwrap().len(), 1);
}

#[tokio::test]
async fn test_without_fail_fast_everything_runs_and_is_cached() {
    let catalog = two_offerings();
    let graph = load_catalog(catalog.root()).unwrap();
    let executor = Arc::new(FakeExecutor::new().respond("a-model", 500, "boom"));
    let cache = memory_cache();

    let report = runner(&executor, &cache, RunnerConfig::default().with_workers(1))
        .run(&graph, &Scope::all())
        .await;
    assert!(!report.passed());
    assert_eq!(report.count(ReportedOutcome::Fail), 1);
    assert_eq!(report.count(ReportedOutcome::Pass), 1);
    assert_eq!(executor.call_count(), 2);

    let entries = cache.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|(_, e)| e.outcome == TestOutcome::Fail));
}

#[tokio::test]
async fn test_cached_failure_is_reported_again() {
    let catalog = two_offerings();
    let graph = load_catalog(catalog.root()).unwrap();
    let failing = Arc::new(FakeExecutor::new().respond("a-model", 401, "denied"));
    let cache = memory_cache();
    runner(&failing, &cache, RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;

    let executor = Arc::new(FakeExecutor::new());
    let report = runner(&executor, &cache, RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;
    let result = report.get(&key("a-model", "first")).unwrap();
    assert_eq!(result.outcome, ReportedOutcome::Fail);
    assert!(result.cached);
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn test_binding_and_execution_errors_become_error_outcomes() {
    let catalog = Catalog::new("acme");
    let mut unknown = chat_example("unknown");
    unknown["template"]["path"] = json!("/{{ deployment }}/chat");
    catalog
        .provider("openai")
        .offering(
            "openai",
            "a-model",
            json!({
                "upstream_access": {"base_url": "https://api.example.com", "api_key": "${NOT_SET}"},
                "code_examples": [chat_example("first")],
            }),
        )
        .offering(
            "openai",
            "b-model",
            json!({"code_examples": [unknown, chat_example("slow")]}),
        );
    let graph = load_catalog(catalog.root()).unwrap();
    let executor = Arc::new(FakeExecutor::new().fail("slow", ExampleError::Timeout(30_000)));
    let cache = memory_cache();
    let config = RunnerConfig::default().with_retries(2, Backoff::new(1, 5));

    let report = runner(&executor, &cache, config)
        .run(&graph, &Scope::all())
        .await;
    assert_eq!(report.count(ReportedOutcome::Error), 3);

    let missing = report.get(&key("a-model", "first")).unwrap();
    assert!(missing.message.as_deref().unwrap().contains("NOT_SET"));
    assert!(missing.cache_key.is_none());

    let placeholder = report.get(&key("b-model", "unknown")).unwrap();
    assert!(placeholder.message.as_deref().unwrap().contains("deployment"));
    let placeholder_key = placeholder.cache_key.as_deref().unwrap();
    assert!(cache.get(placeholder_key).unwrap().is_some());

    let timeout = report.get(&key("b-model", "slow")).unwrap();
    assert!(timeout.message.as_deref().unwrap().contains("Timed out"));
    assert_eq!(executor.call_count(), 3);
    let timeout_key = timeout.cache_key.as_deref().unwrap();
    assert!(cache.get(timeout_key).unwrap().is_none());
}

#[tokio::test]
async fn test_transient_failure_is_retried_then_cached() {
    let catalog = two_offerings();
    let graph = load_catalog(catalog.root()).unwrap();
    let executor = Arc::new(FakeExecutor::new().fail_first(
        "first",
        1,
        ExampleError::Execution("connection reset by peer".into()),
    ));
    let cache = memory_cache();
    let config = RunnerConfig::default().with_retries(2, Backoff::new(1, 5));

    let first = runner(&executor, &cache, config.clone())
        .run(&graph, &Scope::all())
        .await;
    assert!(first.passed(), "{first:?}");
    assert_eq!(first.count(ReportedOutcome::Pass), 2);
    assert_eq!(executor.calls_mentioning("first"), 2);

    let second = runner(&executor, &cache, config)
        .run(&graph, &Scope::all())
        .await;
    assert_eq!(second.cached(), 2);
    assert_eq!(second.count(ReportedOutcome::Pass), 2);
    assert_eq!(executor.calls_mentioning("first"), 2);
}

#[tokio::test]
async fn test_exhausted_retries_are_not_cached() {
    let catalog = two_offerings();
    let graph = load_catalog(catalog.root()).unwrap();
    let executor = Arc::new(FakeExecutor::new().fail_first(
        "first",
        2,
        ExampleError::Execution("connection refused".into()),
    ));
    let cache = memory_cache();
    let config = RunnerConfig::default().with_retries(1, Backoff::new(1, 5));

    let first = runner(&executor, &cache, config.clone())
        .run(&graph, &Scope::all())
        .await;
    let failed = first.get(&key("a-model", "first")).unwrap();
    assert_eq!(failed.outcome, ReportedOutcome::Error);
    assert!(failed.message.as_deref().unwrap().contains("connection refused"));
    assert_eq!(executor.calls_mentioning("first"), 2);

    let second = runner(&executor, &cache, config)
        .run(&graph, &Scope::all())
        .await;
    let recovered = second.get(&key("a-model", "first")).unwrap();
    assert_eq!(recovered.outcome, ReportedOutcome::Pass);
    assert!(!recovered.cached);
    assert_eq!(executor.calls_mentioning("first"), 3);
}

#[tokio::test]
async fn test_rendered_request_uses_resolved_bindings() {
    let catalog = Catalog::new("acme");
    catalog
        .provider("openai")
        .offering(
            "openai",
            "a-model",
            json!({
                "upstream_access": {
                    "base_url": "https://api.openai.com/v1",
                    "api_key": "${OPENAI_KEY}",
                    "headers": {"X-Tier": "{{ tier }}"},
                },
                "variables": {"tier": "standard"},
            }),
        )
        .listing(
            "openai",
            "a-model",
            "premium",
            json!({"variables": {"tier": "premium"}, "code_examples": [chat_example("listed")]}),
        );
    let graph = load_catalog(catalog.root()).unwrap();
    let executor = Arc::new(FakeExecutor::new());

    let report = runner(&executor, &memory_cache(), RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;
    assert!(report.passed());

    let request = &executor.requests()[0];
    assert_eq!(request.url, "https://api.openai.com/v1/chat/completions");
    assert_eq!(request.headers["Authorization"], "Bearer sk-live");
    assert_eq!(request.headers["X-Tier"], "premium");
    assert_eq!(request.body.as_ref().unwrap()["model"], "a-model");
}

#[tokio::test]
async fn test_report_order_is_deterministic_under_concurrency() {
    let catalog = Catalog::new("acme");
    catalog.provider("openai");
    for name in ["d-model", "a-model", "c-model", "b-model"] {
        catalog.offering(
            "openai",
            name,
            json!({"code_examples": [chat_example("one"), chat_example("two")]}),
        );
    }
    let graph = load_catalog(catalog.root()).unwrap();
    let executor = Arc::new(FakeExecutor::new().with_delay(Duration::from_millis(5)));

    let report = runner(&executor, &memory_cache(), RunnerConfig::default().with_workers(4))
        .run(&graph, &Scope::all())
        .await;
    assert_eq!(report.results.len(), 8);
    let keys: Vec<NaturalKey> = report.results.iter().map(|r| r.key.clone()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[tokio::test]
async fn test_scope_filters_examples() {
    let catalog = two_offerings();
    let graph = load_catalog(catalog.root()).unwrap();
    let executor = Arc::new(FakeExecutor::new());

    let scope = Scope::new(None, Some("b-*")).unwrap();
    let report = runner(&executor, &memory_cache(), RunnerConfig::default())
        .run(&graph, &scope)
        .await;
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].key, key("b-model", "second"));
}

#[tokio::test]
async fn test_file_cache_survives_between_runs() {
    let catalog = two_offerings();
    let graph = load_catalog(catalog.root()).unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("cache").join("tests.json");
    let executor = Arc::new(FakeExecutor::new());

    let cache: Arc<dyn TestCacheStore> = Arc::new(FileTestCache::new(&path));
    runner(&executor, &cache, RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;
    assert!(path.exists());

    let reopened: Arc<dyn TestCacheStore> = Arc::new(FileTestCache::new(&path));
    let report = runner(&executor, &reopened, RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;
    assert_eq!(report.cached(), 2);
    assert_eq!(executor.call_count(), 2);
}

#[tokio::test]
async fn test_corrupted_cache_entry_is_a_miss() {
    let catalog = two_offerings();
    let graph = load_catalog(catalog.root()).unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("tests.json");
    let executor = Arc::new(FakeExecutor::new());

    let cache: Arc<dyn TestCacheStore> = Arc::new(FileTestCache::new(&path));
    let first = runner(&executor, &cache, RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;
    let corrupted_key = first.get(&key("a-model", "first")).unwrap().cache_key.clone().unwrap();

    let mut raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    raw[&corrupted_key] = json!({"outcome": "exploded"});
    std::fs::write(&path, raw.to_string()).unwrap();

    let reopened: Arc<dyn TestCacheStore> = Arc::new(FileTestCache::new(&path));
    let report = runner(&executor, &reopened, RunnerConfig::default())
        .run(&graph, &Scope::all())
        .await;
    assert!(report.passed());
    assert_eq!(report.cached(), 1);
    assert_eq!(executor.call_count(), 3);

    let repaired: CacheEntry = reopened.get(&corrupted_key).unwrap().unwrap();
    assert_eq!(repaired.outcome, TestOutcome::Pass);
}
