//! Change set types produced by reconciliation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{EntityKind, NaturalKey};

/// What the publisher must do for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Entity does not exist remotely.
    Create,
    /// Entity exists remotely with different content, or was renamed.
    Update,
    /// Remote content already matches.
    NoOp,
    /// Two local entities claim the same remote entity.
    Conflict,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::NoOp => write!(f, "no-op"),
            Operation::Conflict => write!(f, "conflict"),
        }
    }
}

/// One planned change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub kind: EntityKind,
    pub key: NaturalKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NaturalKey>,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<Uuid>,
    pub local_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_hash: Option<String>,
    /// Full local document; the backend computes the field-level diff.
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Two or more local entities resolving to one remote entity.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{} local entities resolve to remote {remote_id}", keys.len())]
pub struct ReconciliationConflict {
    pub remote_id: Uuid,
    /// The conflicting local entities.
    pub keys: Vec<NaturalKey>,
    /// Descendants left out of the change set because of the conflict.
    pub halted: Vec<NaturalKey>,
}

/// Count of entries per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub create: usize,
    pub update: usize,
    pub no_op: usize,
    pub conflict: usize,
}

impl ChangeSummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.create + self.update + self.no_op + self.conflict
    }
}

/// Ordered plan: parents always precede their children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub entries: Vec<ChangeEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ReconciliationConflict>,
}

impl ChangeSet {
    #[must_use]
    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for entry in &self.entries {
            match entry.operation {
                Operation::Create => summary.create += 1,
                Operation::Update => summary.update += 1,
                Operation::NoOp => summary.no_op += 1,
                Operation::Conflict => summary.conflict += 1,
            }
        }
        summary
    }

    /// True when applying the set would not write anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.conflicts.is_empty() && self.entries.iter().all(|e| e.operation == Operation::NoOp)
    }

    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &NaturalKey) -> Option<&ChangeEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }

    /// Entries that need a backend write.
    pub fn changes(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.operation, Operation::Create | Operation::Update))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
