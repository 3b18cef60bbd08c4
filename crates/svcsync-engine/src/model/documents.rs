//! Versioned entity documents
//!
//! Each file on disk carries a `schema` field naming its document type. The
//! type is resolved once, at load time, into one of the variants of
//! [`Document`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EntityKind, EntityStatus, ExampleKind, ListingStatus, ServiceType};

/// Fields that only matter to the local tooling and are never published.
pub const LOCAL_ONLY_FIELDS: [&str; 5] = [
    "schema",
    "renamed_from",
    "provider",
    "offering",
    "populator",
];

/// A parsed entity document.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Seller(SellerDocument),
    Provider(ProviderDocument),
    Offering(OfferingDocument),
    Listing(ListingDocument),
}

impl Document {
    pub const SELLER_V1: &'static str = "seller_v1";
    pub const PROVIDER_V1: &'static str = "provider_v1";
    pub const OFFERING_V1: &'static str = "offering_v1";
    pub const LISTING_V1: &'static str = "listing_v1";

    /// Decode `value` as the document type named by `schema`.
    ///
    /// Returns `Ok(None)` for a schema string this version does not know.
    pub fn parse(schema: &str, value: Value) -> Result<Option<Self>, serde_json::Error> {
        let doc = match schema {
            Self::SELLER_V1 => Document::Seller(serde_json::from_value(value)?),
            Self::PROVIDER_V1 => Document::Provider(serde_json::from_value(value)?),
            Self::OFFERING_V1 => Document::Offering(serde_json::from_value(value)?),
            Self::LISTING_V1 => Document::Listing(serde_json::from_value(value)?),
            _ => return Ok(None),
        };
        Ok(Some(doc))
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Document::Seller(_) => EntityKind::Seller,
            Document::Provider(_) => EntityKind::Provider,
            Document::Offering(_) => EntityKind::Offering,
            Document::Listing(_) => EntityKind::Listing,
        }
    }

    /// Declared name. Listings may omit it until the loader fills it in.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Document::Seller(d) => Some(&d.name),
            Document::Provider(d) => Some(&d.name),
            Document::Offering(d) => Some(&d.name),
            Document::Listing(d) => d.name.as_deref(),
        }
    }

    /// Former name, when the entity was renamed since the last publish.
    #[must_use]
    pub fn renamed_from(&self) -> Option<&str> {
        match self {
            Document::Seller(_) => None,
            Document::Provider(d) => d.renamed_from.as_deref(),
            Document::Offering(d) => d.renamed_from.as_deref(),
            Document::Listing(d) => d.renamed_from.as_deref(),
        }
    }

    /// Explicit parent reference, if the document names one.
    #[must_use]
    pub fn parent_ref(&self) -> Option<&str> {
        match self {
            Document::Offering(d) => d.provider.as_deref(),
            Document::Listing(d) => d.offering.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn code_examples(&self) -> &[ExampleDefinition] {
        match self {
            Document::Offering(d) => &d.code_examples,
            Document::Listing(d) => &d.code_examples,
            _ => &[],
        }
    }

    pub fn code_examples_mut(&mut self) -> Option<&mut Vec<ExampleDefinition>> {
        match self {
            Document::Offering(d) => Some(&mut d.code_examples),
            Document::Listing(d) => Some(&mut d.code_examples),
            _ => None,
        }
    }

    /// The JSON body sent to the backend for this entity.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        let mut value = match self {
            Document::Seller(d) => serde_json::to_value(d)?,
            Document::Provider(d) => serde_json::to_value(d)?,
            Document::Offering(d) => serde_json::to_value(d)?,
            Document::Listing(d) => serde_json::to_value(d)?,
        };
        if let Value::Object(map) = &mut value {
            for field in LOCAL_ONLY_FIELDS {
                map.remove(field);
            }
            if let Some(Value::Array(examples)) = map.get_mut("code_examples") {
                for example in examples.iter_mut().filter_map(Value::as_object_mut) {
                    example.remove("file");
                }
            }
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populator: Option<Populator>,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

/// Script that regenerates a provider's documents. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Populator {
    pub command: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferingDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub service_type: ServiceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub pricing: Value,
    pub upstream_access: UpstreamAccess,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub code_examples: Vec<ExampleDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

/// How to reach the upstream provider API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamAccess {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offering: Option<String>,
    #[serde(default)]
    pub status: ListingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub pricing: Value,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub code_examples: Vec<ExampleDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

/// A code example as declared inside an offering or listing document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleDefinition {
    pub title: String,
    #[serde(default)]
    pub kind: ExampleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<RequestTemplate>,
    /// Template file, relative to the owning document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_contains: Option<String>,
}

/// HTTP request with `{{ variable }}` placeholders in any string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "POST".to_string()
}
