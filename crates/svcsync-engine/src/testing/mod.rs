//! Code example verification
//!
//! Every example attached to an offering or listing is rendered with its
//! resolved bindings, executed against the upstream with a bounded timeout,
//! classified as pass/fail/error and cached under a content-addressed key.
//!
//! ```text
//! CodeExample ──► Bindings ──► cache_key ──► cache hit? ──► report (cached)
//!                    │                           │ miss / force
//!                    └──────► render ──► ExampleExecutor ──► classify ──► put
//! ```

mod bindings;
mod cache;
mod executor;
mod runner;
mod template;

pub use bindings::{expand_env, Bindings, EnvLookup};
pub use cache::{
    cache_key, CacheEntry, FileTestCache, MemoryTestCache, TestCacheStore, TestOutcome,
};
pub use executor::{ExampleExecutor, ExecutionOutput, HttpExecutor, RemoteExecutor};
pub use runner::{ExampleResult, ReportedOutcome, TestReport, TestRunner};
pub use template::{render, render_str, RenderedRequest};
