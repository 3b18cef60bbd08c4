//! Concurrent code example runner.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::bindings::{Bindings, EnvLookup};
use super::cache::{cache_key, CacheEntry, TestCacheStore, TestOutcome};
use super::executor::{ExampleExecutor, ExecutionOutput};
use super::template::{render, RenderedRequest};
use crate::config::RunnerConfig;
use crate::error::ExampleError;
use crate::loader::{CatalogGraph, CodeExample};
use crate::model::{ExampleKind, NaturalKey};
use crate::reconcile::Scope;
use crate::retry::Backoff;

/// Outcome reported for one example.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedOutcome {
    Pass,
    Fail,
    Error,
    /// Flagged skip and not forced.
    Skipped,
    /// Not started because a fail-fast run had already failed.
    NotRun,
}

impl ReportedOutcome {
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, ReportedOutcome::Fail | ReportedOutcome::Error)
    }
}

impl From<TestOutcome> for ReportedOutcome {
    fn from(outcome: TestOutcome) -> Self {
        match outcome {
            TestOutcome::Pass => ReportedOutcome::Pass,
            TestOutcome::Fail => ReportedOutcome::Fail,
            TestOutcome::Error => ReportedOutcome::Error,
        }
    }
}

/// Result for one example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleResult {
    pub key: NaturalKey,
    pub offering: NaturalKey,
    pub title: String,
    pub kind: ExampleKind,
    pub outcome: ReportedOutcome,
    /// Reported from the cache without executing.
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl ExampleResult {
    fn new(example: &CodeExample, outcome: ReportedOutcome) -> Self {
        Self {
            key: example.key.clone(),
            offering: example.offering.clone(),
            title: example.title.clone(),
            kind: example.kind,
            outcome,
            cached: false,
            cache_key: None,
            status: None,
            message: None,
            duration_ms: 0,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Results of one run, sorted by natural key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub results: Vec<ExampleResult>,
}

impl TestReport {
    /// True when nothing failed or errored.
    #[must_use]
    pub fn passed(&self) -> bool {
        !self.results.iter().any(|r| r.outcome.is_failure())
    }

    #[must_use]
    pub fn count(&self, outcome: ReportedOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Number of results served from the cache.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.results.iter().filter(|r| r.cached).count()
    }

    #[must_use]
    pub fn get(&self, key: &NaturalKey) -> Option<&ExampleResult> {
        self.results.iter().find(|r| &r.key == key)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExampleResult> {
        self.results.iter().filter(|r| r.outcome.is_failure())
    }
}

/// An example with everything needed to run it, detached from the graph.
struct Job {
    example: CodeExample,
    bindings: Result<Bindings, ExampleError>,
    default_headers: BTreeMap<String, String>,
}

#[derive(Clone)]
struct Shared {
    executor: Arc<dyn ExampleExecutor>,
    cache: Arc<dyn TestCacheStore>,
    timeout: Duration,
    max_retries: u32,
    backoff: Backoff,
    force: bool,
    fail_fast: bool,
    stop: Arc<AtomicBool>,
}

impl Shared {
    fn stopped(&self) -> bool {
        self.fail_fast && self.stop.load(Ordering::SeqCst)
    }

    fn record(&self, result: &ExampleResult) {
        if self.fail_fast && result.outcome.is_failure() {
            self.stop.store(true, Ordering::SeqCst);
        }
    }
}

/// Runs catalog code examples against their upstreams.
pub struct TestRunner {
    executor: Arc<dyn ExampleExecutor>,
    cache: Arc<dyn TestCacheStore>,
    config: RunnerConfig,
    env: Arc<EnvLookup>,
}

impl TestRunner {
    /// Create a runner reading `${NAME}` references from the process
    /// environment.
    #[must_use]
    pub fn new(
        executor: Arc<dyn ExampleExecutor>,
        cache: Arc<dyn TestCacheStore>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            executor,
            cache,
            config,
            env: Arc::new(|name: &str| std::env::var(name).ok()),
        }
    }

    /// Replace the environment lookup.
    #[must_use]
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run every in-scope example of `graph`.
    ///
    /// Examples of one offering run in declaration order; offerings run
    /// concurrently up to `workers`. Never fails as a whole: problems with
    /// single examples become `error` results.
    #[instrument(skip_all, fields(root = %graph.root().display()))]
    pub async fn run(&self, graph: &CatalogGraph, scope: &Scope) -> TestReport {
        let started = Instant::now();
        let mut results = Vec::new();
        let mut groups: BTreeMap<NaturalKey, Vec<Job>> = BTreeMap::new();

        for example in graph.examples() {
            if !scope.includes(&example.key) {
                continue;
            }
            if example.is_skipped(self.config.force) {
                debug!(example = %example.key, "Skipping example");
                results.push(ExampleResult::new(example, ReportedOutcome::Skipped));
                continue;
            }
            let job = self.prepare(graph, example);
            groups.entry(example.offering.clone()).or_default().push(job);
        }

        let expected: Vec<(NaturalKey, CodeExample)> = groups
            .values()
            .flatten()
            .map(|job| (job.example.key.clone(), job.example.clone()))
            .collect();

        let shared = Shared {
            executor: Arc::clone(&self.executor),
            cache: Arc::clone(&self.cache),
            timeout: self.config.example_timeout(),
            max_retries: self.config.max_retries,
            backoff: self.config.backoff.clone(),
            force: self.config.force,
            fail_fast: self.config.fail_fast,
            stop: Arc::new(AtomicBool::new(false)),
        };
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut workers = JoinSet::new();

        for (offering, jobs) in groups {
            let permit = Arc::clone(&semaphore).acquire_owned().await;
            let Ok(permit) = permit else {
                warn!(offering = %offering, "Worker pool closed");
                break;
            };
            let shared = shared.clone();
            workers.spawn(async move {
                let _permit = permit;
                run_group(&shared, jobs).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(group) => results.extend(group),
                Err(e) => warn!(error = %e, "Test worker ended abnormally"),
            }
        }

        // Examples whose worker never reported.
        let reported: BTreeSet<NaturalKey> = results.iter().map(|r| r.key.clone()).collect();
        for (key, example) in &expected {
            if reported.contains(key) {
                continue;
            }
            let result = if shared.stopped() {
                ExampleResult::new(example, ReportedOutcome::NotRun)
            } else {
                ExampleResult::new(example, ReportedOutcome::Error)
                    .with_message("test worker ended before reporting")
            };
            results.push(result);
        }

        results.sort_by(|a, b| a.key.cmp(&b.key));
        let report = TestReport { results };
        info!(
            passed = report.count(ReportedOutcome::Pass),
            failed = report.count(ReportedOutcome::Fail),
            errored = report.count(ReportedOutcome::Error),
            skipped = report.count(ReportedOutcome::Skipped),
            not_run = report.count(ReportedOutcome::NotRun),
            cached = report.cached(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Test run finished"
        );
        report
    }

    fn prepare(&self, graph: &CatalogGraph, example: &CodeExample) -> Job {
        let offering = graph.get(&example.offering).and_then(|n| n.as_offering());
        let listing = example
            .listing
            .as_ref()
            .and_then(|key| graph.get(key))
            .and_then(|n| n.as_listing());
        let provider = example.offering.provider_name().unwrap_or_default();

        let (bindings, default_headers) = match offering {
            Some(doc) => (
                Bindings::resolve(provider, doc, listing, &*self.env),
                doc.upstream_access.headers.clone(),
            ),
            None => (
                Err(ExampleError::InvalidRequest(format!(
                    "offering {} is not in the catalog",
                    example.offering
                ))),
                BTreeMap::new(),
            ),
        };

        Job {
            example: example.clone(),
            bindings,
            default_headers,
        }
    }
}

async fn run_group(shared: &Shared, jobs: Vec<Job>) -> Vec<ExampleResult> {
    let mut results = Vec::with_capacity(jobs.len());
    for job in jobs {
        if shared.stopped() {
            results.push(ExampleResult::new(&job.example, ReportedOutcome::NotRun));
            continue;
        }
        let result = run_example(shared, &job).await;
        shared.record(&result);
        results.push(result);
    }
    results
}

async fn run_example(shared: &Shared, job: &Job) -> ExampleResult {
    let example = &job.example;
    let bindings = match &job.bindings {
        Ok(bindings) => bindings,
        Err(e) => {
            warn!(example = %example.key, error = %e, "Cannot resolve example bindings");
            return ExampleResult::new(example, ReportedOutcome::Error).with_message(e.to_string());
        }
    };

    let key = cache_key(example, bindings);
    if !shared.force {
        match shared.cache.get(&key) {
            Ok(Some(entry)) => {
                debug!(example = %example.key, outcome = ?entry.outcome, "Cached result");
                let mut result = ExampleResult::new(example, entry.outcome.into());
                result.cached = true;
                result.cache_key = Some(key);
                result.message = entry.message;
                return result;
            }
            Ok(None) => {}
            Err(e) => warn!(example = %example.key, error = %e, "Test cache read failed"),
        }
    }

    let started = Instant::now();
    let executed = match render(&example.template, bindings, &job.default_headers) {
        Ok(request) => execute_with_retry(shared, example, &request).await,
        Err(e) => Err(e),
    };

    let (outcome, digest, status, message, cacheable) = match executed {
        Ok(output) => {
            let (outcome, message) = classify(example, &output);
            (outcome, output.digest(), Some(output.status), message, true)
        }
        Err(e) => (
            TestOutcome::Error,
            String::new(),
            None,
            Some(e.to_string()),
            !e.is_transient(),
        ),
    };

    // Transient failures are never cached.
    if cacheable {
        let mut entry = CacheEntry::new(outcome, digest);
        entry.message = message.clone();
        if let Err(e) = shared.cache.put(&key, entry) {
            warn!(example = %example.key, error = %e, "Test cache write failed");
        }
    } else {
        debug!(example = %example.key, "Not caching transient failure");
    }

    let mut result = ExampleResult::new(example, outcome.into());
    result.cache_key = Some(key);
    result.status = status;
    result.message = message;
    result.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        example = %example.key,
        outcome = ?result.outcome,
        duration_ms = result.duration_ms,
        "Example finished"
    );
    result
}

/// Execute with the per-attempt timeout, retrying transient failures.
async fn execute_with_retry(
    shared: &Shared,
    example: &CodeExample,
    request: &RenderedRequest,
) -> Result<ExecutionOutput, ExampleError> {
    let timeout_ms = shared.timeout.as_millis() as u64;
    let mut attempt = 0;
    loop {
        let executed =
            tokio::time::timeout(shared.timeout, shared.executor.execute(request, shared.timeout))
                .await
                .unwrap_or(Err(ExampleError::Timeout(timeout_ms)));
        match executed {
            Err(e) if e.is_transient() && attempt < shared.max_retries => {
                attempt += 1;
                let wait = shared.backoff.delay(attempt);
                warn!(
                    example = %example.key,
                    error = %e,
                    attempt = attempt,
                    wait_ms = wait.as_millis() as u64,
                    "Example execution failed in transit, retrying"
                );
                tokio::time::sleep(wait).await;
            }
            other => return other,
        }
    }
}

/// Pass when the status matches (2xx unless an explicit status is expected)
/// and the body contains the expected text.
fn classify(example: &CodeExample, output: &ExecutionOutput) -> (TestOutcome, Option<String>) {
    let status_ok = match example.expect_status {
        Some(expected) => output.status == expected,
        None => (200..300).contains(&output.status),
    };
    if !status_ok {
        let expected = example
            .expect_status
            .map_or_else(|| "2xx".to_string(), |s| s.to_string());
        return (
            TestOutcome::Fail,
            Some(format!("expected status {expected}, got {}", output.status)),
        );
    }
    if let Some(needle) = &example.expect_contains {
        if !output.body.contains(needle.as_str()) {
            return (
                TestOutcome::Fail,
                Some(format!("response does not contain '{needle}'")),
            );
        }
    }
    (TestOutcome::Pass, None)
}
