//! Variable bindings for code example templates.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ExampleError;
use crate::model::{ListingDocument, OfferingDocument};

static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("ENV_REF is a valid regex pattern")
});

/// Environment lookup injected into the runner.
pub type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Resolved template variables, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    values: BTreeMap<String, String>,
}

impl Bindings {
    /// Resolve the variables visible to an example.
    ///
    /// Offering variables come first and listing variables override them.
    /// The built-ins `base_url`, `api_key`, `model` and `provider` fill in
    /// any name the documents left unset. `${NAME}` references are replaced
    /// through `env`.
    pub fn resolve(
        provider: &str,
        offering: &OfferingDocument,
        listing: Option<&ListingDocument>,
        env: &EnvLookup,
    ) -> Result<Self, ExampleError> {
        let mut raw: BTreeMap<String, String> = offering.variables.clone();
        if let Some(listing) = listing {
            raw.extend(listing.variables.clone());
        }

        let access = &offering.upstream_access;
        let builtins = [
            ("base_url", Some(access.base_url.clone())),
            ("api_key", access.api_key.clone()),
            ("model", Some(offering.name.clone())),
            ("provider", Some(provider.to_string())),
        ];
        for (name, value) in builtins {
            if let Some(value) = value {
                raw.entry(name.to_string()).or_insert(value);
            }
        }

        let mut values = BTreeMap::new();
        for (name, value) in raw {
            values.insert(name, expand_env(&value, env)?);
        }
        Ok(Self { values })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Name/value pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Replace every `${NAME}` in `value` through `env`.
pub fn expand_env(value: &str, env: &EnvLookup) -> Result<String, ExampleError> {
    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for caps in ENV_REF.captures_iter(value) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let resolved =
            env(name.as_str()).ok_or_else(|| ExampleError::MissingEnv(name.as_str().to_string()))?;
        out.push_str(&value[last..whole.start()]);
        out.push_str(&resolved);
        last = whole.end();
    }
    out.push_str(&value[last..]);
    Ok(out)
}
