//! Per-entity publish results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{EntityKind, NaturalKey};
use crate::reconcile::Operation;

/// Backend call a result refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishAction {
    Create,
    Update,
    NoOp,
    Conflict,
    Deprecate,
    Delete,
}

impl From<Operation> for PublishAction {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::Create => PublishAction::Create,
            Operation::Update => PublishAction::Update,
            Operation::NoOp => PublishAction::NoOp,
            Operation::Conflict => PublishAction::Conflict,
        }
    }
}

/// What happened to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Created,
    Updated,
    Unchanged,
    /// Deprecated or deleted through an explicit retire.
    Retired,
    Failed,
    /// A parent failed, conflicted or was skipped.
    Skipped,
    Conflict,
    /// Dry run: the call that would have been made.
    Planned,
}

impl PublishOutcome {
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, PublishOutcome::Failed | PublishOutcome::Conflict)
    }

    /// Whether children of this entity may proceed.
    #[must_use]
    pub fn unblocks_children(self) -> bool {
        matches!(
            self,
            PublishOutcome::Created
                | PublishOutcome::Updated
                | PublishOutcome::Unchanged
                | PublishOutcome::Planned
        )
    }
}

/// Result for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub kind: EntityKind,
    pub key: NaturalKey,
    pub action: PublishAction,
    pub outcome: PublishOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<Uuid>,
    /// Error or explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PublishResult {
    /// Create a successful result.
    pub fn success(
        key: &NaturalKey,
        action: PublishAction,
        outcome: PublishOutcome,
        remote_id: Option<Uuid>,
    ) -> Self {
        Self {
            kind: key.kind(),
            key: key.clone(),
            action,
            outcome,
            remote_id,
            message: None,
        }
    }

    /// Create a failure result.
    pub fn failure(key: &NaturalKey, action: PublishAction, message: impl Into<String>) -> Self {
        Self {
            kind: key.kind(),
            key: key.clone(),
            action,
            outcome: PublishOutcome::Failed,
            remote_id: None,
            message: Some(message.into()),
        }
    }

    /// Create a result for an entity that was not attempted.
    pub fn skipped(key: &NaturalKey, action: PublishAction, message: impl Into<String>) -> Self {
        Self {
            outcome: PublishOutcome::Skipped,
            ..Self::failure(key, action, message)
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_remote_id(mut self, remote_id: Option<Uuid>) -> Self {
        self.remote_id = remote_id;
        self
    }
}

/// Count of results per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSummary {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub retired: usize,
    pub failed: usize,
    pub skipped: usize,
    pub conflict: usize,
    pub planned: usize,
}

/// Results of applying a change set, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub results: Vec<PublishResult>,
    pub summary: PublishSummary,
}

impl PublishReport {
    /// Create from results.
    #[must_use]
    pub fn from_results(results: Vec<PublishResult>) -> Self {
        let mut summary = PublishSummary {
            total: results.len(),
            ..PublishSummary::default()
        };
        for result in &results {
            match result.outcome {
                PublishOutcome::Created => summary.created += 1,
                PublishOutcome::Updated => summary.updated += 1,
                PublishOutcome::Unchanged => summary.unchanged += 1,
                PublishOutcome::Retired => summary.retired += 1,
                PublishOutcome::Failed => summary.failed += 1,
                PublishOutcome::Skipped => summary.skipped += 1,
                PublishOutcome::Conflict => summary.conflict += 1,
                PublishOutcome::Planned => summary.planned += 1,
            }
        }
        Self { results, summary }
    }

    /// True when nothing failed, conflicted or was skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.summary.failed == 0 && self.summary.conflict == 0 && self.summary.skipped == 0
    }

    #[must_use]
    pub fn get(&self, key: &NaturalKey) -> Option<&PublishResult> {
        self.results.iter().find(|r| &r.key == key)
    }

    /// Number of backend writes made.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.summary.created + self.summary.updated + self.summary.retired
    }
}
