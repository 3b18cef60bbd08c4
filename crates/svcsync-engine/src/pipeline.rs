//! End-to-end operations: load, reconcile, publish, verify.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::backend::{fetch_snapshot, Backend};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::loader::{load_catalog, CatalogGraph};
use crate::publish::{PublishOptions, PublishReport, Publisher};
use crate::reconcile::{plan, ChangeSet, IdentityMap, RemoteSnapshot, Scope};
use crate::tasks::TaskPoller;
use crate::testing::{
    ExampleExecutor, FileTestCache, HttpExecutor, RemoteExecutor, TestCacheStore, TestReport,
    TestRunner,
};

/// Result of a publish run. A dry run carries the plan and a report of
/// `planned` results.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub changeset: ChangeSet,
    pub report: PublishReport,
    pub dry_run: bool,
}

impl SyncOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.changeset.has_conflicts() && self.report.is_success()
    }
}

/// Wires loader, reconciliation, publisher and test runner to one backend.
#[derive(Clone)]
pub struct SyncPipeline {
    backend: Arc<dyn Backend>,
    config: EngineConfig,
}

impl SyncPipeline {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, config: EngineConfig) -> Self {
        Self { backend, config }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    /// Task poller using the configured polling policy.
    #[must_use]
    pub fn poller(&self) -> TaskPoller {
        TaskPoller::new(Arc::clone(&self.backend), self.config.poll.clone())
    }

    /// Current remote state for `scope`.
    pub async fn snapshot(&self, scope: &Scope) -> EngineResult<RemoteSnapshot> {
        let snapshot =
            fetch_snapshot(self.backend.as_ref(), scope, self.config.backend.page_size).await?;
        Ok(snapshot)
    }

    /// Load `root` and diff it against the backend.
    #[instrument(skip(self, root, scope), fields(root = %root.as_ref().display()))]
    pub async fn plan(&self, root: impl AsRef<Path>, scope: &Scope) -> EngineResult<ChangeSet> {
        let graph = load_catalog(root)?;
        let snapshot = self.snapshot(scope).await?;
        Ok(plan(&graph, &snapshot, scope))
    }

    /// Load, diff and apply.
    ///
    /// With `dry_run` nothing is written; the returned change set is the one
    /// a real run would apply.
    #[instrument(skip(self, root, scope), fields(root = %root.as_ref().display()))]
    pub async fn publish(
        &self,
        root: impl AsRef<Path>,
        scope: &Scope,
        options: PublishOptions,
    ) -> EngineResult<SyncOutcome> {
        let graph = load_catalog(root)?;
        let snapshot = self.snapshot(scope).await?;
        let changeset = plan(&graph, &snapshot, scope);

        let mut identity = IdentityMap::from_snapshot(&snapshot);
        let publisher = Publisher::new(Arc::clone(&self.backend), options);
        let report = publisher.apply(&changeset, &mut identity).await;

        info!(
            entries = changeset.len(),
            conflicts = changeset.conflicts.len(),
            success = report.is_success(),
            dry_run = options.dry_run,
            "Publish run complete"
        );
        Ok(SyncOutcome {
            changeset,
            report,
            dry_run: options.dry_run,
        })
    }

    /// Verify the examples under `root` directly against their upstreams,
    /// using the cache file from the configuration.
    pub async fn run_tests(
        &self,
        root: impl AsRef<Path>,
        scope: &Scope,
    ) -> EngineResult<TestReport> {
        let graph = load_catalog(root)?;
        let cache = Arc::new(FileTestCache::new(&self.config.cache_path));
        Ok(self
            .run_tests_with(&graph, scope, Arc::new(HttpExecutor::new()), cache)
            .await)
    }

    /// Verify the examples under `root` through backend `remote_test` tasks.
    pub async fn run_remote_tests(
        &self,
        root: impl AsRef<Path>,
        scope: &Scope,
    ) -> EngineResult<TestReport> {
        let graph = load_catalog(root)?;
        let cache = Arc::new(FileTestCache::new(&self.config.cache_path));
        let executor = Arc::new(RemoteExecutor::new(self.poller()));
        Ok(self.run_tests_with(&graph, scope, executor, cache).await)
    }

    /// Verify the examples of an already loaded graph.
    pub async fn run_tests_with(
        &self,
        graph: &CatalogGraph,
        scope: &Scope,
        executor: Arc<dyn ExampleExecutor>,
        cache: Arc<dyn TestCacheStore>,
    ) -> TestReport {
        TestRunner::new(executor, cache, self.config.runner.clone())
            .run(graph, scope)
            .await
    }
}
