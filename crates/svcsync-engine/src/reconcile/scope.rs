//! Provider/service filters for a run.

use globset::{Glob, GlobMatcher};

use crate::error::{EngineError, EngineResult};
use crate::model::NaturalKey;

/// Restricts a run to providers and offerings whose names match the globs.
///
/// The seller is always in scope. Listings and code examples follow their
/// offering.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    provider: Option<GlobMatcher>,
    service: Option<GlobMatcher>,
}

impl Scope {
    /// Scope that includes everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Compile a scope from optional provider and service globs.
    pub fn new(provider: Option<&str>, service: Option<&str>) -> EngineResult<Self> {
        Ok(Self {
            provider: provider.map(compile).transpose()?,
            service: service.map(compile).transpose()?,
        })
    }

    /// Whether the entity identified by `key` takes part in the run.
    #[must_use]
    pub fn includes(&self, key: &NaturalKey) -> bool {
        match key {
            NaturalKey::Seller { .. } => true,
            NaturalKey::Provider { provider } => self.provider_matches(provider),
            NaturalKey::Offering { provider, offering }
            | NaturalKey::Listing {
                provider, offering, ..
            }
            | NaturalKey::Example {
                provider, offering, ..
            } => self.provider_matches(provider) && self.service_matches(offering),
        }
    }

    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.provider.is_none() && self.service.is_none()
    }

    fn provider_matches(&self, name: &str) -> bool {
        self.provider.as_ref().map_or(true, |m| m.is_match(name))
    }

    fn service_matches(&self, name: &str) -> bool {
        self.service.as_ref().map_or(true, |m| m.is_match(name))
    }
}

fn compile(pattern: &str) -> EngineResult<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| EngineError::Scope {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}
