//! Persisted declarations between reconciliation runs.
//!
//! The remote id is the only durable link between a declared entity and the
//! live one, so after every run the caller stores what the run settled and
//! feeds it back as the next run's old set. Keys are kept in a `BTreeMap` so
//! the serialized form is deterministic.

use crate::{error::Result, Entity, EntityKind, Error, Parent, ParentId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Settled declarations of one (parent, kind) collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionState {
    pub parent: Parent,
    pub kind: EntityKind,
    /// Declarations with remote ids, in declaration order
    pub entities: Vec<Entity>,
}

/// A point-in-time record of every reconciled collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// When the snapshot was last written (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Collections keyed by `"{parent_id}/{kind}"`
    pub collections: BTreeMap<String, CollectionState>,
    /// Template ids resolved from host names, for offline planning
    #[serde(default)]
    pub aliases: BTreeMap<String, ParentId>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            updated_at: 0,
            collections: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    fn key(parent: &Parent, kind: EntityKind) -> String {
        format!("{}/{}", parent.id(), kind)
    }

    /// Settled declarations of a collection; empty if never reconciled.
    pub fn entities(&self, parent: &Parent, kind: EntityKind) -> Vec<Entity> {
        self.collections
            .get(&Self::key(parent, kind))
            .map(|state| state.entities.clone())
            .unwrap_or_default()
    }

    /// Replace the settled declarations of a collection.
    pub fn record(
        &mut self,
        parent: &Parent,
        kind: EntityKind,
        entities: Vec<Entity>,
        timestamp: Timestamp,
    ) {
        self.collections.insert(
            Self::key(parent, kind),
            CollectionState {
                parent: parent.clone(),
                kind,
                entities,
            },
        );
        self.updated_at = timestamp;
    }

    /// Forget a collection once nothing of it is left on the remote.
    pub fn remove(&mut self, parent: &Parent, kind: EntityKind) -> Option<CollectionState> {
        self.collections.remove(&Self::key(parent, kind))
    }

    pub fn record_alias(&mut self, host: impl Into<String>, template_id: impl Into<ParentId>) {
        self.aliases.insert(host.into(), template_id.into());
    }

    /// Template id last resolved for `host`.
    pub fn alias(&self, host: &str) -> Option<&ParentId> {
        self.aliases.get(host)
    }

    /// Collections recorded in the snapshot but absent from `keep`.
    pub fn orphaned<'a>(
        &'a self,
        keep: &'a [(Parent, EntityKind)],
    ) -> impl Iterator<Item = &'a CollectionState> + 'a {
        self.collections.values().filter(move |state| {
            !keep
                .iter()
                .any(|(parent, kind)| *parent == state.parent && *kind == state.kind)
        })
    }

    /// Count entities across all collections.
    pub fn entity_count(&self) -> usize {
        self.collections.values().map(|c| c.entities.len()).sum()
    }

    /// Check that every stored entity is usable as an old declaration.
    pub fn validate(&self) -> Result<()> {
        for (key, state) in &self.collections {
            if *key != Self::key(&state.parent, state.kind) {
                return Err(Error::InvalidSnapshot(format!(
                    "collection key '{}' does not match its contents",
                    key
                )));
            }
            for entity in &state.entities {
                if entity.kind() != state.kind {
                    return Err(Error::InvalidSnapshot(format!(
                        "{} '{}' stored under {}",
                        entity.kind(),
                        entity.name,
                        key
                    )));
                }
                if !entity.has_remote_id() {
                    return Err(Error::InvalidSnapshot(format!(
                        "{} '{}' under {} has no remote id",
                        entity.kind(),
                        entity.name,
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(Error::SnapshotVersionMismatch {
                expected: SNAPSHOT_FORMAT_VERSION,
                actual: snapshot.format_version,
            });
        }
        snapshot.validate()?;

        Ok(snapshot)
    }
}
