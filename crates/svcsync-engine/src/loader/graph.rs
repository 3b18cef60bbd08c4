//! The loaded catalog graph.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::model::{
    Document, EntityKind, ExampleDefinition, ExampleKind, ListingDocument, NaturalKey,
    OfferingDocument, RequestTemplate,
};

/// One seller, provider, offering or listing, with its parent resolved.
#[derive(Debug, Clone)]
pub struct EntityNode {
    pub key: NaturalKey,
    /// Owning entity. `None` only for the seller.
    pub parent: Option<NaturalKey>,
    pub document: Document,
    /// File the document was read from.
    pub path: PathBuf,
    /// Position in traversal order.
    pub order: usize,
    /// JSON body published to the backend.
    pub payload: Value,
    /// Hash of `payload`, comparable with the backend's stored hash.
    pub content_hash: String,
}

impl EntityNode {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.key.kind()
    }

    #[must_use]
    pub fn as_offering(&self) -> Option<&OfferingDocument> {
        match &self.document {
            Document::Offering(doc) => Some(doc),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_listing(&self) -> Option<&ListingDocument> {
        match &self.document {
            Document::Listing(doc) => Some(doc),
            _ => None,
        }
    }
}

/// A code example with its template loaded and its owners resolved.
#[derive(Debug, Clone)]
pub struct CodeExample {
    pub key: NaturalKey,
    pub offering: NaturalKey,
    /// Set when the example is declared on a listing.
    pub listing: Option<NaturalKey>,
    pub title: String,
    pub kind: ExampleKind,
    pub skip: bool,
    pub template: RequestTemplate,
    pub expect_status: Option<u16>,
    pub expect_contains: Option<String>,
    /// Document that declares the example.
    pub path: PathBuf,
}

impl CodeExample {
    pub(crate) fn from_definition(
        definition: &ExampleDefinition,
        template: RequestTemplate,
        offering: &NaturalKey,
        listing: Option<&NaturalKey>,
        path: &Path,
    ) -> Self {
        Self {
            key: NaturalKey::example(
                offering.provider_name().unwrap_or_default(),
                offering.name(),
                listing.map(|l| l.name().to_string()),
                definition.title.clone(),
            ),
            offering: offering.clone(),
            listing: listing.cloned(),
            title: definition.title.clone(),
            kind: definition.kind,
            skip: definition.skip,
            template,
            expect_status: definition.expect_status,
            expect_contains: definition.expect_contains.clone(),
            path: path.to_path_buf(),
        }
    }

    /// Whether a non-forced run leaves this example out.
    #[must_use]
    pub fn is_skipped(&self, force: bool) -> bool {
        self.skip && self.kind.is_skippable() && !force
    }
}

/// Fully linked catalog: every parent reference resolved, keys unique.
#[derive(Debug, Clone)]
pub struct CatalogGraph {
    root: PathBuf,
    nodes: Vec<EntityNode>,
    index: HashMap<NaturalKey, usize>,
    examples: Vec<CodeExample>,
}

impl CatalogGraph {
    /// Build a graph from linked nodes already in dependency order: by kind
    /// rank, then traversal order.
    pub(crate) fn new(root: PathBuf, nodes: Vec<EntityNode>, examples: Vec<CodeExample>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.key.clone(), i))
            .collect();
        Self {
            root,
            nodes,
            index,
            examples,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All entities in dependency order.
    #[must_use]
    pub fn nodes(&self) -> &[EntityNode] {
        &self.nodes
    }

    #[must_use]
    pub fn seller(&self) -> Option<&EntityNode> {
        self.of_kind(EntityKind::Seller).next()
    }

    pub fn providers(&self) -> impl Iterator<Item = &EntityNode> {
        self.of_kind(EntityKind::Provider)
    }

    pub fn offerings(&self) -> impl Iterator<Item = &EntityNode> {
        self.of_kind(EntityKind::Offering)
    }

    pub fn listings(&self) -> impl Iterator<Item = &EntityNode> {
        self.of_kind(EntityKind::Listing)
    }

    fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &EntityNode> {
        self.nodes.iter().filter(move |n| n.kind() == kind)
    }

    /// Code examples in declaration order.
    #[must_use]
    pub fn examples(&self) -> &[CodeExample] {
        &self.examples
    }

    #[must_use]
    pub fn get(&self, key: &NaturalKey) -> Option<&EntityNode> {
        self.index.get(key).map(|&i| &self.nodes[i])
    }

    #[must_use]
    pub fn parent_of(&self, key: &NaturalKey) -> Option<&EntityNode> {
        self.get(key)
            .and_then(|n| n.parent.as_ref())
            .and_then(|p| self.get(p))
    }

    /// Whether `ancestor` appears on the parent chain of `key`.
    #[must_use]
    pub fn descends_from(&self, key: &NaturalKey, ancestor: &NaturalKey) -> bool {
        let mut current = self.get(key).and_then(|n| n.parent.as_ref());
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.get(parent).and_then(|n| n.parent.as_ref());
        }
        false
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
