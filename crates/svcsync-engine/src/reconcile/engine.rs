//! Reconciliation engine.
//!
//! Diffs the local graph against a remote snapshot. Pure: no I/O, no clock.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::changeset::{ChangeEntry, ChangeSet, Operation, ReconciliationConflict};
use super::identity::{RemoteEntity, RemoteSnapshot};
use super::scope::Scope;
use crate::loader::{CatalogGraph, EntityNode};
use crate::model::NaturalKey;

/// How a local entity was matched to a remote one.
struct Resolution<'a> {
    remote: &'a RemoteEntity,
    /// Former name, when matched through `renamed_from`.
    alias: Option<&'a str>,
}

/// Compute the change set that brings the backend in line with `graph`.
///
/// Entities are visited in dependency order and the resulting entries keep
/// that order. Remote entities without a local counterpart are left alone.
#[instrument(skip_all, fields(local = graph.len(), remote = snapshot.len()))]
pub fn plan(graph: &CatalogGraph, snapshot: &RemoteSnapshot, scope: &Scope) -> ChangeSet {
    let nodes: Vec<&EntityNode> = graph
        .nodes()
        .iter()
        .filter(|n| scope.includes(&n.key))
        .collect();

    let mut resolved: HashMap<&NaturalKey, Resolution<'_>> = HashMap::new();
    for node in nodes.iter().copied() {
        let parent_id = node
            .parent
            .as_ref()
            .and_then(|p| resolved.get(p))
            .map(|r| r.remote.id);
        if let Some(resolution) = resolve(node, parent_id, snapshot) {
            resolved.insert(&node.key, resolution);
        }
    }

    let mut conflicts = find_conflicts(&nodes, &resolved);
    let mut blocked: HashMap<&NaturalKey, usize> = HashMap::new();
    for (index, conflict) in conflicts.iter().enumerate() {
        for key in &conflict.keys {
            if let Some(node) = nodes.iter().copied().find(|n| &n.key == key) {
                blocked.insert(&node.key, index);
            }
        }
    }

    let mut entries = Vec::with_capacity(nodes.len());
    for node in nodes.iter().copied() {
        let halted_by = node.parent.as_ref().and_then(|p| blocked.get(p)).copied();
        if let Some(index) = halted_by {
            if !blocked.contains_key(&node.key) {
                debug!(key = %node.key, "Halted by conflict in parent");
                conflicts[index].halted.push(node.key.clone());
                blocked.insert(&node.key, index);
                continue;
            }
        }

        let entry = match (blocked.get(&node.key), resolved.get(&node.key)) {
            (Some(&index), _) => conflict_entry(node, &conflicts[index]),
            (None, Some(resolution)) => matched_entry(node, resolution),
            (None, None) => change_entry(node, Operation::Create, None, None),
        };
        debug!(key = %entry.key, operation = %entry.operation, "Planned change");
        entries.push(entry);
    }

    for conflict in &conflicts {
        warn!(
            remote_id = %conflict.remote_id,
            keys = ?conflict.keys,
            halted = conflict.halted.len(),
            "Reconciliation conflict"
        );
    }

    let changeset = ChangeSet { entries, conflicts };
    let summary = changeset.summary();
    info!(
        create = summary.create,
        update = summary.update,
        no_op = summary.no_op,
        conflict = summary.conflict,
        "Plan computed"
    );
    changeset
}

/// Match a local entity to a remote one.
///
/// Tries the entity's own name, then its former name. Each name is looked up
/// by full natural key first, then by name under the parent's remote id.
fn resolve<'a>(
    node: &'a EntityNode,
    parent_id: Option<Uuid>,
    snapshot: &'a RemoteSnapshot,
) -> Option<Resolution<'a>> {
    let kind = node.kind();
    let lookup = |key: &NaturalKey| {
        snapshot.find(key).or_else(|| {
            parent_id.and_then(|pid| snapshot.find_child(pid, kind, key.name()))
        })
    };

    if let Some(remote) = lookup(&node.key) {
        return Some(Resolution {
            remote,
            alias: None,
        });
    }
    let former = node.document.renamed_from()?;
    lookup(&node.key.with_name(former)).map(|remote| Resolution {
        remote,
        alias: Some(former),
    })
}

/// Group matched entities by remote id; any group larger than one conflicts.
///
/// Groups are settled one rank at a time. Descendants of a conflicting
/// entity claim nothing: they are halted, not conflicting themselves.
fn find_conflicts(
    nodes: &[&EntityNode],
    resolved: &HashMap<&NaturalKey, Resolution<'_>>,
) -> Vec<ReconciliationConflict> {
    let mut conflicts = Vec::new();
    let mut in_conflict: HashSet<NaturalKey> = HashSet::new();
    let mut claims: Vec<(Uuid, Vec<NaturalKey>)> = Vec::new();
    let mut rank = None;

    for node in nodes {
        let node_rank = node.kind().rank();
        if rank != Some(node_rank) {
            settle_claims(&mut claims, &mut conflicts, &mut in_conflict);
            rank = Some(node_rank);
        }
        if node.parent.as_ref().is_some_and(|p| in_conflict.contains(p)) {
            in_conflict.insert(node.key.clone());
            continue;
        }
        let Some(resolution) = resolved.get(&node.key) else {
            continue;
        };
        let id = resolution.remote.id;
        match claims.iter_mut().find(|(claimed, _)| *claimed == id) {
            Some((_, keys)) => keys.push(node.key.clone()),
            None => claims.push((id, vec![node.key.clone()])),
        }
    }
    settle_claims(&mut claims, &mut conflicts, &mut in_conflict);
    conflicts
}

fn settle_claims(
    claims: &mut Vec<(Uuid, Vec<NaturalKey>)>,
    conflicts: &mut Vec<ReconciliationConflict>,
    in_conflict: &mut HashSet<NaturalKey>,
) {
    for (remote_id, keys) in claims.drain(..) {
        if keys.len() > 1 {
            in_conflict.extend(keys.iter().cloned());
            conflicts.push(ReconciliationConflict {
                remote_id,
                keys,
                halted: Vec::new(),
            });
        }
    }
}

fn matched_entry(node: &EntityNode, resolution: &Resolution<'_>) -> ChangeEntry {
    let remote = resolution.remote;
    if let Some(former) = resolution.alias {
        let mut entry = change_entry(node, Operation::Update, Some(remote), None);
        entry.reason = Some(format!("renamed from '{former}'"));
        return entry;
    }
    if remote.content_hash == node.content_hash {
        change_entry(node, Operation::NoOp, Some(remote), None)
    } else {
        change_entry(node, Operation::Update, Some(remote), Some("content changed"))
    }
}

fn conflict_entry(node: &EntityNode, conflict: &ReconciliationConflict) -> ChangeEntry {
    let others: Vec<String> = conflict
        .keys
        .iter()
        .filter(|k| **k != node.key)
        .map(ToString::to_string)
        .collect();
    let mut entry = change_entry(node, Operation::Conflict, None, None);
    entry.remote_id = Some(conflict.remote_id);
    entry.reason = Some(format!(
        "resolves to the same remote entity as {}",
        others.join(", ")
    ));
    entry
}

fn change_entry(
    node: &EntityNode,
    operation: Operation,
    remote: Option<&RemoteEntity>,
    reason: Option<&str>,
) -> ChangeEntry {
    ChangeEntry {
        kind: node.kind(),
        key: node.key.clone(),
        parent: node.parent.clone(),
        operation,
        remote_id: remote.map(|r| r.id),
        local_hash: node.content_hash.clone(),
        remote_hash: remote.map(|r| r.content_hash.clone()),
        payload: node.payload.clone(),
        reason: reason.map(str::to_string),
    }
}
