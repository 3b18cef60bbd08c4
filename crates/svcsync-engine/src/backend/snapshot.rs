//! Remote snapshot assembly.

use std::collections::HashMap;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::Backend;
use crate::error::BackendError;
use crate::model::{EntityKind, NaturalKey};
use crate::reconcile::{RemoteEntity, RemoteSnapshot, Scope};

/// List every published kind and rebuild natural keys from parent links.
///
/// Records whose parent is missing from the listing are dropped with a
/// warning; they cannot be matched to anything local.
#[instrument(skip_all)]
pub async fn fetch_snapshot(
    backend: &dyn Backend,
    scope: &Scope,
    page_size: u32,
) -> Result<RemoteSnapshot, BackendError> {
    let mut keys: HashMap<Uuid, NaturalKey> = HashMap::new();
    let mut snapshot = RemoteSnapshot::default();

    for kind in EntityKind::PUBLISHED {
        let records = backend.list_all(kind, page_size).await?;
        for record in records {
            let parent = record.parent_id.and_then(|id| keys.get(&id));
            let key = match (kind, parent) {
                (EntityKind::Seller, _) => NaturalKey::seller(&record.name),
                (EntityKind::Provider, _) => NaturalKey::provider(&record.name),
                (EntityKind::Offering, Some(NaturalKey::Provider { provider })) => {
                    NaturalKey::offering(provider, &record.name)
                }
                (EntityKind::Listing, Some(NaturalKey::Offering { provider, offering })) => {
                    NaturalKey::listing(provider, offering, &record.name)
                }
                _ => {
                    warn!(
                        kind = %kind,
                        id = %record.id,
                        name = %record.name,
                        "Remote entity has no resolvable parent, ignoring"
                    );
                    continue;
                }
            };

            keys.insert(record.id, key.clone());
            if scope.includes(&key) {
                snapshot.push(RemoteEntity {
                    id: record.id,
                    kind,
                    key,
                    parent_id: record.parent_id,
                    content_hash: record.content_hash,
                });
            }
        }
    }

    info!(entities = snapshot.len(), "Remote snapshot fetched");
    Ok(snapshot)
}
