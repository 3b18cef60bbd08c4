//! Publisher
//!
//! Applies a [`ChangeSet`](crate::reconcile::ChangeSet) to the backend in
//! plan order, threading an [`IdentityMap`](crate::reconcile::IdentityMap)
//! so children created in the same run see their parent's new id.

mod publisher;
mod result;

pub use publisher::{PublishOptions, Publisher, RetireMode};
pub use result::{PublishAction, PublishOutcome, PublishReport, PublishResult, PublishSummary};
