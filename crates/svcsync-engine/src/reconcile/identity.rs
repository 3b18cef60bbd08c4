//! Remote state and the natural key to UUID mapping.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{EntityKind, NaturalKey};

/// One entity as the backend stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub key: NaturalKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub content_hash: String,
}

/// Flat listing of remote entities, taken once at the start of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    entities: Vec<RemoteEntity>,
}

impl RemoteSnapshot {
    #[must_use]
    pub fn new(entities: Vec<RemoteEntity>) -> Self {
        Self { entities }
    }

    pub fn push(&mut self, entity: RemoteEntity) {
        self.entities.push(entity);
    }

    #[must_use]
    pub fn entities(&self) -> &[RemoteEntity] {
        &self.entities
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Find the entity stored under `key`.
    #[must_use]
    pub fn find(&self, key: &NaturalKey) -> Option<&RemoteEntity> {
        self.entities.iter().find(|e| &e.key == key)
    }

    /// Find a child of `parent_id` by kind and name.
    ///
    /// Catches entities whose parent was renamed, so their stored key still
    /// carries the parent's former name.
    #[must_use]
    pub fn find_child(
        &self,
        parent_id: Uuid,
        kind: EntityKind,
        name: &str,
    ) -> Option<&RemoteEntity> {
        self.entities.iter().find(|e| {
            e.parent_id == Some(parent_id) && e.kind == kind && e.key.name() == name
        })
    }

    #[must_use]
    pub fn by_id(&self, id: Uuid) -> Option<&RemoteEntity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

/// Natural key to backend UUID, refreshed from the snapshot every run and
/// extended by the publisher as creates succeed.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    ids: HashMap<NaturalKey, Uuid>,
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the map with every entity in the snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &RemoteSnapshot) -> Self {
        Self {
            ids: snapshot
                .entities()
                .iter()
                .map(|e| (e.key.clone(), e.id))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &NaturalKey) -> Option<Uuid> {
        self.ids.get(key).copied()
    }

    /// Record `id` for `key`, returning the previous id if any.
    pub fn insert(&mut self, key: NaturalKey, id: Uuid) -> Option<Uuid> {
        self.ids.insert(key, id)
    }

    #[must_use]
    pub fn contains(&self, key: &NaturalKey) -> bool {
        self.ids.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Entries in natural key order.
    #[must_use]
    pub fn sorted(&self) -> Vec<(&NaturalKey, Uuid)> {
        let mut entries: Vec<_> = self.ids.iter().map(|(k, v)| (k, *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}
