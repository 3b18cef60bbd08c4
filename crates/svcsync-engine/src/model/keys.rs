//! Natural keys
//!
//! Local entities are identified by the names their authors chose, never by
//! backend ids, which do not exist before the first publish.

use serde::{Deserialize, Serialize};

use super::EntityKind;

/// Composite name-based identity of a catalog entity.
///
/// The derived ordering (kind first, then names) is the deterministic
/// report order used throughout the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NaturalKey {
    Seller {
        seller: String,
    },
    Provider {
        provider: String,
    },
    Offering {
        provider: String,
        offering: String,
    },
    Listing {
        provider: String,
        offering: String,
        listing: String,
    },
    Example {
        provider: String,
        offering: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        listing: Option<String>,
        title: String,
    },
}

impl NaturalKey {
    pub fn seller(seller: impl Into<String>) -> Self {
        Self::Seller {
            seller: seller.into(),
        }
    }

    pub fn provider(provider: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
        }
    }

    pub fn offering(provider: impl Into<String>, offering: impl Into<String>) -> Self {
        Self::Offering {
            provider: provider.into(),
            offering: offering.into(),
        }
    }

    pub fn listing(
        provider: impl Into<String>,
        offering: impl Into<String>,
        listing: impl Into<String>,
    ) -> Self {
        Self::Listing {
            provider: provider.into(),
            offering: offering.into(),
            listing: listing.into(),
        }
    }

    pub fn example(
        provider: impl Into<String>,
        offering: impl Into<String>,
        listing: Option<String>,
        title: impl Into<String>,
    ) -> Self {
        Self::Example {
            provider: provider.into(),
            offering: offering.into(),
            listing,
            title: title.into(),
        }
    }

    /// Entity kind this key identifies.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            NaturalKey::Seller { .. } => EntityKind::Seller,
            NaturalKey::Provider { .. } => EntityKind::Provider,
            NaturalKey::Offering { .. } => EntityKind::Offering,
            NaturalKey::Listing { .. } => EntityKind::Listing,
            NaturalKey::Example { .. } => EntityKind::CodeExample,
        }
    }

    /// The entity's own name (last key component).
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            NaturalKey::Seller { seller } => seller,
            NaturalKey::Provider { provider } => provider,
            NaturalKey::Offering { offering, .. } => offering,
            NaturalKey::Listing { listing, .. } => listing,
            NaturalKey::Example { title, .. } => title,
        }
    }

    /// Same key with the last component replaced.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        let mut key = self.clone();
        let name = name.into();
        match &mut key {
            NaturalKey::Seller { seller } => *seller = name,
            NaturalKey::Provider { provider } => *provider = name,
            NaturalKey::Offering { offering, .. } => *offering = name,
            NaturalKey::Listing { listing, .. } => *listing = name,
            NaturalKey::Example { title, .. } => *title = name,
        }
        key
    }

    /// Provider name, for every kind below the seller.
    #[must_use]
    pub fn provider_name(&self) -> Option<&str> {
        match self {
            NaturalKey::Seller { .. } => None,
            NaturalKey::Provider { provider }
            | NaturalKey::Offering { provider, .. }
            | NaturalKey::Listing { provider, .. }
            | NaturalKey::Example { provider, .. } => Some(provider),
        }
    }

    /// Key of the offering this entity belongs to (itself for an offering).
    #[must_use]
    pub fn offering_key(&self) -> Option<NaturalKey> {
        match self {
            NaturalKey::Seller { .. } | NaturalKey::Provider { .. } => None,
            NaturalKey::Offering { provider, offering }
            | NaturalKey::Listing {
                provider, offering, ..
            }
            | NaturalKey::Example {
                provider, offering, ..
            } => Some(NaturalKey::offering(provider.clone(), offering.clone())),
        }
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NaturalKey::Seller { seller } => write!(f, "{seller}"),
            NaturalKey::Provider { provider } => write!(f, "{provider}"),
            NaturalKey::Offering { provider, offering } => write!(f, "{provider}/{offering}"),
            NaturalKey::Listing {
                provider,
                offering,
                listing,
            } => write!(f, "{provider}/{offering}/{listing}"),
            NaturalKey::Example {
                provider,
                offering,
                listing: Some(listing),
                title,
            } => write!(f, "{provider}/{offering}/{listing}/{title}"),
            NaturalKey::Example {
                provider,
                offering,
                listing: None,
                title,
            } => write!(f, "{provider}/{offering}/{title}"),
        }
    }
}
