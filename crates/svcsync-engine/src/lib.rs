//! # svcsync engine
//!
//! Reconciliation and verification engine for service catalogs kept as
//! version-controlled documents.
//!
//! The engine:
//! - loads a directory of seller/provider/offering/listing documents into a
//!   typed, fully linked graph
//! - diffs that graph against a snapshot of the backend and produces an
//!   ordered, idempotent change set
//! - publishes the change set with partial-failure semantics
//! - verifies code examples against upstream providers, caching the results
//! - drives long-running backend tasks through an explicit polling state machine
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐   ┌─────────┐
//! │  Loader  │──►│ Reconcile    │──►│ Publisher │──►│ Backend │
//! │          │   │ (ChangeSet)  │   │           │   │         │
//! └────┬─────┘   └──────────────┘   └───────────┘   └────▲────┘
//!      │                                                 │
//!      ▼                                                 │
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐      │
//! │  Runner  │──►│  Executors   │──►│ Task Poller │──────┘
//! │ (+Cache) │   │ (HTTP/remote)│   │             │
//! └──────────┘   └──────────────┘   └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use svcsync_engine::{EngineConfig, HttpBackend, Scope, SyncPipeline, PublishOptions};
//!
//! let config = EngineConfig::from_file("svcsync.toml")?.with_env_overrides();
//! let backend = HttpBackend::new(&config.backend, config.retry.clone())?;
//! let pipeline = SyncPipeline::new(std::sync::Arc::new(backend), config);
//!
//! let scope = Scope::new(Some("openai*"), None)?;
//! let outcome = pipeline.publish("./data", &scope, PublishOptions::default()).await?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod publish;
pub mod reconcile;
pub mod retry;
pub mod tasks;
pub mod testing;

pub use backend::{
    fetch_snapshot, Backend, HttpBackend, ListFilter, ListPage, PublishRequest, RemoteRecord,
    RemoteTaskState, RemoteTaskStatus, TaskHandle,
};
pub use config::{BackendConfig, EngineConfig, PollConfig, RunnerConfig};
pub use error::{BackendError, CacheError, EngineError, EngineResult, ExampleError, LoadError};
pub use loader::{load_catalog, CatalogGraph, CodeExample, EntityNode};
pub use logging::LogFormat;
pub use model::{EntityKind, ExampleKind, NaturalKey, ServiceType};
pub use pipeline::{SyncOutcome, SyncPipeline};
pub use publish::{
    PublishAction, PublishOptions, PublishOutcome, PublishReport, PublishResult, PublishSummary,
    Publisher, RetireMode,
};
pub use reconcile::{
    plan, ChangeEntry, ChangeSet, ChangeSummary, IdentityMap, Operation, ReconciliationConflict,
    RemoteEntity, RemoteSnapshot, Scope,
};
pub use retry::{Backoff, RetryConfig};
pub use tasks::{TaskError, TaskKind, TaskPoller, TaskReport, TaskState, TaskTransition};
pub use testing::{
    CacheEntry, ExampleExecutor, ExampleResult, ExecutionOutput, FileTestCache, HttpExecutor,
    MemoryTestCache, RemoteExecutor, RenderedRequest, ReportedOutcome, TestCacheStore,
    TestOutcome, TestReport, TestRunner,
};
