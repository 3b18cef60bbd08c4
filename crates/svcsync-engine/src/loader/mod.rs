//! Entity graph loader
//!
//! Reads a catalog directory into a [`CatalogGraph`]. Layout is free-form;
//! parents are found through explicit references or by directory nesting:
//!
//! ```text
//! data/
//! ├── seller.json              (schema = seller_v1)
//! └── openai/
//!     ├── provider.toml        (schema = provider_v1)
//!     └── gpt-4o/
//!         ├── offering.json    (schema = offering_v1)
//!         ├── chat.json        (request template, no schema)
//!         └── listing.json     (schema = listing_v1)
//! ```
//!
//! Loading is a pure read. Any broken reference or duplicate key fails the
//! whole load; no partial graph is returned.

mod graph;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::error::LoadError;
use crate::model::{content_hash, Document, EntityKind, NaturalKey, RequestTemplate};

pub use graph::{CatalogGraph, CodeExample, EntityNode};

/// Marker for local override files that never hold entity documents.
const OVERRIDE_MARKER: &str = ".override.";

/// A document read from disk, before parent resolution.
struct RawDocument {
    path: PathBuf,
    dir: PathBuf,
    document: Document,
    order: usize,
}

/// Load the catalog rooted at `root`.
#[instrument(skip_all, fields(root = %root.as_ref().display()))]
pub fn load_catalog(root: impl AsRef<Path>) -> Result<CatalogGraph, LoadError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(LoadError::Io {
            path: root.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "catalog root is not a directory",
            ),
        });
    }

    let raw = read_documents(root)?;
    let mut nodes = link(root, raw)?;
    // Dependency order: examples are collected and stored in it.
    nodes.sort_by_key(|n| (n.kind().rank(), n.order));

    let mut examples = Vec::new();
    for node in &nodes {
        collect_examples(node, &mut examples)?;
    }

    let graph = CatalogGraph::new(root.to_path_buf(), nodes, examples);
    info!(
        providers = graph.providers().count(),
        offerings = graph.offerings().count(),
        listings = graph.listings().count(),
        examples = graph.examples().len(),
        "Catalog loaded"
    );
    Ok(graph)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn is_document_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    if name.contains(OVERRIDE_MARKER) {
        return false;
    }
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("toml")
    )
}

fn walk_error(root: &Path, err: walkdir::Error) -> LoadError {
    let path = err.path().unwrap_or(root).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
    LoadError::Io { path, source }
}

fn read_value(path: &Path) -> Result<Value, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
    if is_toml {
        toml::from_str::<Value>(&content).map_err(|e| LoadError::parse(path, e.to_string()))
    } else {
        serde_json::from_str::<Value>(&content).map_err(|e| LoadError::parse(path, e.to_string()))
    }
}

/// Walk the tree in file-name order and decode every entity document.
fn read_documents(root: &Path) -> Result<Vec<RawDocument>, LoadError> {
    let mut docs = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_document_file(path) {
            continue;
        }

        let value = read_value(path)?;
        let schema = match value.get("schema") {
            None => {
                debug!(path = %path.display(), "Ignoring file without schema");
                continue;
            }
            Some(Value::String(schema)) => schema.clone(),
            Some(_) => return Err(LoadError::parse(path, "'schema' must be a string")),
        };

        let mut document = Document::parse(&schema, value)
            .map_err(|e| LoadError::parse(path, e.to_string()))?
            .ok_or_else(|| LoadError::UnknownSchema {
                path: path.to_path_buf(),
                schema: schema.clone(),
            })?;

        if let Document::Listing(listing) = &mut document {
            if listing.name.is_none() {
                listing.name = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned());
            }
        }
        resolve_templates(path, &mut document)?;

        debug!(path = %path.display(), schema = %schema, "Read document");
        docs.push(RawDocument {
            path: path.to_path_buf(),
            dir: path.parent().unwrap_or(root).to_path_buf(),
            document,
            order: docs.len(),
        });
    }
    Ok(docs)
}

/// Replace `file` indirections with the template they point at.
fn resolve_templates(path: &Path, document: &mut Document) -> Result<(), LoadError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let Some(examples) = document.code_examples_mut() else {
        return Ok(());
    };

    let mut titles = HashSet::new();
    for example in examples.iter_mut() {
        if !titles.insert(example.title.clone()) {
            return Err(LoadError::invalid(
                path,
                format!("duplicate code example title '{}'", example.title),
            ));
        }
        if example.template.is_some() {
            continue;
        }
        let Some(file) = &example.file else {
            return Err(LoadError::invalid(
                path,
                format!("code example '{}' has neither template nor file", example.title),
            ));
        };
        let template_path = dir.join(file);
        let value = read_value(&template_path)?;
        let template: RequestTemplate = serde_json::from_value(value)
            .map_err(|e| LoadError::parse(&template_path, e.to_string()))?;
        example.template = Some(template);
    }
    Ok(())
}

/// Pick the document whose directory is the deepest ancestor of `dir`.
///
/// Two candidates at the same depth make the lookup ambiguous.
fn nearest<'a>(
    candidates: &'a [(PathBuf, NaturalKey)],
    dir: &Path,
) -> Result<Option<&'a NaturalKey>, Vec<&'a NaturalKey>> {
    let mut best: Vec<&'a NaturalKey> = Vec::new();
    let mut best_depth = 0;
    for (candidate_dir, key) in candidates.iter().filter(|(d, _)| dir.starts_with(d)) {
        let depth = candidate_dir.components().count();
        if best.is_empty() || depth > best_depth {
            best = vec![key];
            best_depth = depth;
        } else if depth == best_depth {
            best.push(key);
        }
    }
    match best.len() {
        0 => Ok(None),
        1 => Ok(Some(best[0])),
        _ => Err(best),
    }
}

struct KeyRegistry {
    seen: HashMap<NaturalKey, PathBuf>,
}

impl KeyRegistry {
    fn register(&mut self, key: &NaturalKey, path: &Path) -> Result<(), LoadError> {
        if let Some(first) = self.seen.get(key) {
            return Err(LoadError::DuplicateKey {
                path: path.to_path_buf(),
                key: key.clone(),
                first: first.clone(),
            });
        }
        self.seen.insert(key.clone(), path.to_path_buf());
        Ok(())
    }
}

/// Resolve every parent reference and assign natural keys.
fn link(root: &Path, raw: Vec<RawDocument>) -> Result<Vec<EntityNode>, LoadError> {
    let mut registry = KeyRegistry {
        seen: HashMap::new(),
    };
    let by_kind = |kind: EntityKind| raw.iter().filter(move |d| d.document.kind() == kind);

    let mut sellers = by_kind(EntityKind::Seller);
    let seller_doc = sellers.next().ok_or_else(|| LoadError::MissingSeller {
        root: root.to_path_buf(),
    })?;
    let seller_key = NaturalKey::seller(seller_doc.document.name().unwrap_or_default());
    registry.register(&seller_key, &seller_doc.path)?;
    if let Some(second) = sellers.next() {
        return Err(LoadError::DuplicateKey {
            path: second.path.clone(),
            key: NaturalKey::seller(second.document.name().unwrap_or_default()),
            first: seller_doc.path.clone(),
        });
    }

    let mut resolved: Vec<(&RawDocument, NaturalKey, Option<NaturalKey>)> =
        vec![(seller_doc, seller_key.clone(), None)];

    // providers
    let mut provider_dirs = Vec::new();
    for doc in by_kind(EntityKind::Provider) {
        let key = NaturalKey::provider(doc.document.name().unwrap_or_default());
        registry.register(&key, &doc.path)?;
        provider_dirs.push((doc.dir.clone(), key.clone()));
        resolved.push((doc, key, Some(seller_key.clone())));
    }

    // offerings
    let mut offering_dirs = Vec::new();
    for doc in by_kind(EntityKind::Offering) {
        let provider = match doc.document.parent_ref() {
            Some(reference) => {
                let key = NaturalKey::provider(reference);
                if !registry.seen.contains_key(&key) {
                    return Err(LoadError::unresolved(
                        &doc.path,
                        format!("provider '{reference}'"),
                    ));
                }
                key
            }
            None => by_directory(&provider_dirs, doc, EntityKind::Provider)?,
        };
        let name = doc.document.name().unwrap_or_default();
        let key = NaturalKey::offering(provider.name(), name);
        registry.register(&key, &doc.path)?;
        offering_dirs.push((doc.dir.clone(), key.clone()));
        resolved.push((doc, key, Some(provider)));
    }

    // listings
    for doc in by_kind(EntityKind::Listing) {
        let offering = match doc.document.parent_ref() {
            Some(reference) => {
                resolve_offering_ref(reference, doc, &provider_dirs, &offering_dirs)?
            }
            None => by_directory(&offering_dirs, doc, EntityKind::Offering)?,
        };
        let key = NaturalKey::listing(
            offering.provider_name().unwrap_or_default(),
            offering.name(),
            doc.document.name().unwrap_or_default(),
        );
        registry.register(&key, &doc.path)?;
        resolved.push((doc, key, Some(offering)));
    }

    resolved
        .into_iter()
        .map(|(doc, key, parent)| {
            let payload = doc
                .document
                .payload()
                .map_err(|e| LoadError::parse(&doc.path, e.to_string()))?;
            Ok(EntityNode {
                content_hash: content_hash(&payload),
                key,
                parent,
                document: doc.document.clone(),
                path: doc.path.clone(),
                order: doc.order,
                payload,
            })
        })
        .collect()
}

/// Resolve a parent by directory nesting alone.
fn by_directory(
    candidates: &[(PathBuf, NaturalKey)],
    doc: &RawDocument,
    parent: EntityKind,
) -> Result<NaturalKey, LoadError> {
    match nearest(candidates, &doc.dir) {
        Ok(Some(key)) => Ok(key.clone()),
        Ok(None) => Err(LoadError::unresolved(
            &doc.path,
            format!("{parent} (none in this or any parent directory)"),
        )),
        Err(keys) => Err(LoadError::unresolved(
            &doc.path,
            format!("{parent} (ambiguous: {} in the same directory)", keys.len()),
        )),
    }
}

/// Resolve a listing's explicit `offering` reference.
///
/// Accepts `provider/offering` or a bare offering name. A bare name prefers
/// the offering under the listing's own provider directory, then any offering
/// with that name if there is exactly one.
fn resolve_offering_ref(
    reference: &str,
    doc: &RawDocument,
    provider_dirs: &[(PathBuf, NaturalKey)],
    offering_dirs: &[(PathBuf, NaturalKey)],
) -> Result<NaturalKey, LoadError> {
    let unresolved = || LoadError::unresolved(&doc.path, format!("offering '{reference}'"));

    if let Some((provider, offering)) = reference.split_once('/') {
        let key = NaturalKey::offering(provider, offering);
        return offering_dirs
            .iter()
            .any(|(_, k)| *k == key)
            .then_some(key)
            .ok_or_else(unresolved);
    }

    let candidates: Vec<&NaturalKey> = offering_dirs
        .iter()
        .map(|(_, k)| k)
        .filter(|k| k.name() == reference)
        .collect();

    if let Ok(Some(provider)) = nearest(provider_dirs, &doc.dir) {
        let local = NaturalKey::offering(provider.name(), reference);
        if candidates.contains(&&local) {
            return Ok(local);
        }
    }
    match candidates.as_slice() {
        [only] => Ok((*only).clone()),
        _ => Err(unresolved()),
    }
}

fn collect_examples(node: &EntityNode, out: &mut Vec<CodeExample>) -> Result<(), LoadError> {
    let (offering, listing) = match node.kind() {
        EntityKind::Offering => (&node.key, None),
        EntityKind::Listing => match &node.parent {
            Some(parent) => (parent, Some(&node.key)),
            None => return Ok(()),
        },
        _ => return Ok(()),
    };
    for definition in node.document.code_examples() {
        let template = definition.template.clone().ok_or_else(|| {
            LoadError::invalid(
                &node.path,
                format!("code example '{}' has no template", definition.title),
            )
        })?;
        out.push(CodeExample::from_definition(
            definition, template, offering, listing, &node.path,
        ));
    }
    Ok(())
}
