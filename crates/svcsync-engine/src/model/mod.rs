//! Typed catalog model
//!
//! Entity kinds, natural keys, and the versioned documents that describe
//! sellers, providers, offerings and listings on disk.

mod documents;
mod keys;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use documents::{
    Document, ExampleDefinition, ListingDocument, OfferingDocument, Populator, ProviderDocument,
    RequestTemplate, SellerDocument, UpstreamAccess, LOCAL_ONLY_FIELDS,
};
pub use keys::NaturalKey;

/// Kind of catalog entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Seller,
    Provider,
    Offering,
    Listing,
    CodeExample,
}

impl EntityKind {
    /// Kinds the backend stores, in dependency order.
    pub const PUBLISHED: [EntityKind; 4] = [
        EntityKind::Seller,
        EntityKind::Provider,
        EntityKind::Offering,
        EntityKind::Listing,
    ];

    /// Dependency rank. Parents always rank lower than their children.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            EntityKind::Seller => 0,
            EntityKind::Provider => 1,
            EntityKind::Offering => 2,
            EntityKind::Listing => 3,
            EntityKind::CodeExample => 4,
        }
    }

    /// REST collection name on the backend.
    #[must_use]
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Seller => "sellers",
            EntityKind::Provider => "providers",
            EntityKind::Offering => "offerings",
            EntityKind::Listing => "listings",
            EntityKind::CodeExample => "code_examples",
        }
    }

    /// Kind of the owning entity, if any.
    #[must_use]
    pub fn parent_kind(self) -> Option<EntityKind> {
        match self {
            EntityKind::Seller => None,
            EntityKind::Provider => Some(EntityKind::Seller),
            EntityKind::Offering => Some(EntityKind::Provider),
            EntityKind::Listing => Some(EntityKind::Offering),
            EntityKind::CodeExample => Some(EntityKind::Offering),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Seller => write!(f, "seller"),
            EntityKind::Provider => write!(f, "provider"),
            EntityKind::Offering => write!(f, "offering"),
            EntityKind::Listing => write!(f, "listing"),
            EntityKind::CodeExample => write!(f, "code_example"),
        }
    }
}

/// Kind of service an offering sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Llm,
    Embedding,
    ImageGeneration,
    SpeechToText,
    TextToSpeech,
    Vision,
    Rerank,
    Other,
}

impl ServiceType {
    /// Wire name of the service type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Llm => "llm",
            ServiceType::Embedding => "embedding",
            ServiceType::ImageGeneration => "image_generation",
            ServiceType::SpeechToText => "speech_to_text",
            ServiceType::TextToSpeech => "text_to_speech",
            ServiceType::Vision => "vision",
            ServiceType::Rerank => "rerank",
            ServiceType::Other => "other",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marketplace status of a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    #[default]
    Draft,
    Pending,
    Ready,
    Active,
    Rejected,
    Deprecated,
}

/// Status of a seller or provider account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    Active,
    Pending,
    Disabled,
    Incomplete,
}

pub type SellerStatus = EntityStatus;
pub type ProviderStatus = EntityStatus;

/// Kind of code example.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleKind {
    /// Regular usage example. May be skipped.
    #[default]
    Example,
    /// Health check against the upstream. Never skipped.
    Connectivity,
}

impl ExampleKind {
    #[must_use]
    pub fn is_skippable(self) -> bool {
        matches!(self, ExampleKind::Example)
    }
}

/// Render a JSON value compactly with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

/// Lowercase hex SHA-256 of the canonical JSON form of `value`.
#[must_use]
pub fn content_hash(value: &serde_json::Value) -> String {
    hex::encode(Sha256::digest(canonical_json(value).as_bytes()))
}
