//! Applies change sets to the backend.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::result::{PublishAction, PublishOutcome, PublishReport, PublishResult};
use crate::backend::{Backend, PublishRequest};
use crate::model::NaturalKey;
use crate::reconcile::{ChangeEntry, ChangeSet, IdentityMap, Operation};

/// Publisher switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Send no-op entries as updates.
    #[serde(default)]
    pub force: bool,
    /// Report the calls that would be made without making them.
    #[serde(default)]
    pub dry_run: bool,
}

impl PublishOptions {
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Explicit removal of a remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireMode {
    Deprecate,
    Delete,
}

impl From<RetireMode> for PublishAction {
    fn from(mode: RetireMode) -> Self {
        match mode {
            RetireMode::Deprecate => PublishAction::Deprecate,
            RetireMode::Delete => PublishAction::Delete,
        }
    }
}

/// Applies change sets entry by entry.
///
/// A failed, conflicting or skipped entity skips its whole subtree; its
/// siblings still proceed. Backend rejections are recorded, never retried.
pub struct Publisher {
    backend: Arc<dyn Backend>,
    options: PublishOptions,
}

impl Publisher {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, options: PublishOptions) -> Self {
        Self { backend, options }
    }

    #[must_use]
    pub fn options(&self) -> PublishOptions {
        self.options
    }

    /// Apply `changeset` in order.
    ///
    /// Parent ids are read from `identity` when each entry is sent, and every
    /// successful create is recorded there before the next entry.
    #[instrument(skip_all, fields(entries = changeset.len(), dry_run = self.options.dry_run))]
    pub async fn apply(&self, changeset: &ChangeSet, identity: &mut IdentityMap) -> PublishReport {
        let mut blocked: HashSet<NaturalKey> = HashSet::new();
        let mut results = Vec::with_capacity(changeset.len());

        for entry in &changeset.entries {
            let action = PublishAction::from(entry.operation);
            if let Some(parent) = entry.parent.as_ref().filter(|p| blocked.contains(*p)) {
                debug!(
                    key = %entry.key,
                    parent = %parent,
                    "Skipping dependent of unpublished parent"
                );
                blocked.insert(entry.key.clone());
                results.push(PublishResult::skipped(
                    &entry.key,
                    action,
                    format!("parent {parent} was not published"),
                ));
                continue;
            }

            let result = self.apply_entry(entry, identity).await;
            if !result.outcome.unblocks_children() {
                blocked.insert(entry.key.clone());
            }
            results.push(result);
        }

        for conflict in &changeset.conflicts {
            for key in &conflict.halted {
                results.push(PublishResult::skipped(
                    key,
                    PublishAction::NoOp,
                    format!("halted by conflict on remote {}", conflict.remote_id),
                ));
            }
        }

        let report = PublishReport::from_results(results);
        info!(
            created = report.summary.created,
            updated = report.summary.updated,
            unchanged = report.summary.unchanged,
            failed = report.summary.failed,
            skipped = report.summary.skipped,
            conflict = report.summary.conflict,
            planned = report.summary.planned,
            "Publish finished"
        );
        report
    }

    async fn apply_entry(&self, entry: &ChangeEntry, identity: &mut IdentityMap) -> PublishResult {
        let key = &entry.key;
        let operation = match entry.operation {
            Operation::NoOp if self.options.force => Operation::Update,
            other => other,
        };
        let action = PublishAction::from(operation);

        match operation {
            Operation::Conflict => {
                warn!(key = %key, "Not publishing conflicting entity");
                let mut result = PublishResult::success(
                    key,
                    action,
                    PublishOutcome::Conflict,
                    entry.remote_id,
                );
                result.message = entry.reason.clone();
                result
            }
            Operation::NoOp => {
                if let Some(id) = entry.remote_id {
                    identity.insert(key.clone(), id);
                }
                PublishResult::success(key, action, PublishOutcome::Unchanged, entry.remote_id)
            }
            Operation::Create => self.create(entry, action, identity).await,
            Operation::Update => self.update(entry, action, identity).await,
        }
    }

    fn parent_id(entry: &ChangeEntry, identity: &IdentityMap) -> Result<Option<Uuid>, String> {
        match &entry.parent {
            None => Ok(None),
            Some(parent) => identity
                .get(parent)
                .map(Some)
                .ok_or_else(|| format!("parent {parent} has no remote id")),
        }
    }

    async fn create(
        &self,
        entry: &ChangeEntry,
        action: PublishAction,
        identity: &mut IdentityMap,
    ) -> PublishResult {
        let key = &entry.key;
        if self.options.dry_run {
            return PublishResult::success(key, action, PublishOutcome::Planned, None);
        }
        let parent_id = match Self::parent_id(entry, identity) {
            Ok(id) => id,
            Err(message) => return PublishResult::failure(key, action, message),
        };

        let request = PublishRequest::new(
            key.clone(),
            parent_id,
            entry.local_hash.clone(),
            entry.payload.clone(),
        );
        match self.backend.create(entry.kind, &request).await {
            Ok(id) => {
                info!(key = %key, remote_id = %id, "Created");
                identity.insert(key.clone(), id);
                PublishResult::success(key, action, PublishOutcome::Created, Some(id))
            }
            Err(e) => {
                error!(key = %key, error = %e, "Create failed");
                PublishResult::failure(key, action, e.to_string())
            }
        }
    }

    async fn update(
        &self,
        entry: &ChangeEntry,
        action: PublishAction,
        identity: &mut IdentityMap,
    ) -> PublishResult {
        let key = &entry.key;
        let Some(id) = entry.remote_id.or_else(|| identity.get(key)) else {
            return PublishResult::failure(key, action, format!("{key} has no remote id"));
        };
        if self.options.dry_run {
            return PublishResult::success(key, action, PublishOutcome::Planned, Some(id));
        }
        let parent_id = match Self::parent_id(entry, identity) {
            Ok(parent_id) => parent_id,
            Err(message) => return PublishResult::failure(key, action, message),
        };

        let request = PublishRequest::new(
            key.clone(),
            parent_id,
            entry.local_hash.clone(),
            entry.payload.clone(),
        );
        match self.backend.update(entry.kind, id, &request).await {
            Ok(()) => {
                info!(key = %key, remote_id = %id, "Updated");
                // A rename keeps the remote id under the new key.
                identity.insert(key.clone(), id);
                let result =
                    PublishResult::success(key, action, PublishOutcome::Updated, Some(id));
                match &entry.reason {
                    Some(reason) => result.with_message(reason.clone()),
                    None => result,
                }
            }
            Err(e) => {
                error!(key = %key, remote_id = %id, error = %e, "Update failed");
                PublishResult::failure(key, action, e.to_string()).with_remote_id(Some(id))
            }
        }
    }

    /// Deprecate or delete the remote counterpart of `key`.
    ///
    /// Keys without a remote id fail without contacting the backend.
    #[instrument(skip(self, identity), fields(key = %key))]
    pub async fn retire(
        &self,
        key: &NaturalKey,
        mode: RetireMode,
        identity: &IdentityMap,
    ) -> PublishResult {
        let action = PublishAction::from(mode);
        let Some(id) = identity.get(key) else {
            return PublishResult::failure(key, action, format!("{key} has no remote id"));
        };
        if self.options.dry_run {
            return PublishResult::success(key, action, PublishOutcome::Planned, Some(id));
        }

        let kind = key.kind();
        let outcome = match mode {
            RetireMode::Deprecate => self.backend.deprecate(kind, id).await,
            RetireMode::Delete => self.backend.delete(kind, id).await,
        };
        match outcome {
            Ok(()) => {
                info!(remote_id = %id, mode = ?mode, "Retired");
                PublishResult::success(key, action, PublishOutcome::Retired, Some(id))
            }
            Err(e) => {
                error!(remote_id = %id, error = %e, "Retire failed");
                PublishResult::failure(key, action, e.to_string()).with_remote_id(Some(id))
            }
        }
    }
}
