//! Tracing subscriber setup for binaries embedding the engine.
//!
//! The engine itself only emits `tracing` events; installing a subscriber is
//! left to the caller.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{EngineError, EngineResult};

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, for terminals.
    #[default]
    Pretty,
    /// One JSON object per line, for log aggregation.
    Json,
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `filter`. Fails if a subscriber is
/// already installed or the filter does not parse.
pub fn init(format: LogFormat, filter: Option<&str>) -> EngineResult<()> {
    let directive = filter.unwrap_or(DEFAULT_FILTER);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .map_err(|e| EngineError::Config(format!("invalid log filter '{directive}': {e}")))?;

    let registry = tracing_subscriber::registry().with(filter_layer);
    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .try_init(),
    };
    installed.map_err(|e| EngineError::Config(format!("logging already initialized: {e}")))?;

    tracing::debug!(format = ?format, filter = %directive, "Logging initialized");
    Ok(())
}
