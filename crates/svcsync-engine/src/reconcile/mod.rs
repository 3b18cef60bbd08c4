//! Reconciliation
//!
//! Compares the local catalog graph to a snapshot of remote entities and
//! produces an ordered, idempotent [`ChangeSet`].
//!
//! ## Matching
//!
//! ```text
//! local entity ──► exact natural key ──► (parent id, kind, name)
//!        │                  miss                    miss
//!        └─► renamed_from ──► exact natural key ──► (parent id, kind, former name)
//! ```
//!
//! A match through `renamed_from` is always an update. Two local entities
//! matching one remote entity is a [`ReconciliationConflict`]: both get a
//! conflict entry, their subtrees get none, and siblings reconcile normally.
//!
//! Remote entities with no local counterpart are never deleted here.

mod changeset;
mod engine;
mod identity;
mod scope;

pub use changeset::{ChangeEntry, ChangeSet, ChangeSummary, Operation, ReconciliationConflict};
pub use engine::plan;
pub use identity::{IdentityMap, RemoteEntity, RemoteSnapshot};
pub use scope::Scope;
