//! The boundary between the engine and the remote monitoring server.

use crate::{Entity, EntityKind, Parent, Query, RemoteError, RemoteId};

/// Bulk operations over one remote collection kind.
///
/// Implementations block until the remote answers. The engine never calls
/// two methods concurrently for one reconciliation run.
pub trait RemoteCollection {
    /// Fetch entities matching `query`.
    fn get(&self, query: &Query) -> Result<Vec<Entity>, RemoteError>;

    /// Create `entities` under `parent`, returning the assigned ids in input
    /// order.
    fn create(
        &self,
        kind: EntityKind,
        parent: &Parent,
        entities: &[Entity],
    ) -> Result<Vec<RemoteId>, RemoteError>;

    /// Update `entities`; each carries its remote id.
    fn update(&self, kind: EntityKind, entities: &[Entity]) -> Result<(), RemoteError>;

    /// Delete by remote id.
    fn delete(&self, kind: EntityKind, ids: &[RemoteId]) -> Result<(), RemoteError>;

    /// Fetch entities of `kind` under `parent` that a linked ancestor
    /// template owns.
    fn inherited_candidates(
        &self,
        kind: EntityKind,
        parent: &Parent,
    ) -> Result<Vec<Entity>, RemoteError> {
        self.get(&Query::inherited_candidates(kind, parent.clone()))
    }
}

impl<T: RemoteCollection + ?Sized> RemoteCollection for &T {
    fn get(&self, query: &Query) -> Result<Vec<Entity>, RemoteError> {
        (**self).get(query)
    }

    fn create(
        &self,
        kind: EntityKind,
        parent: &Parent,
        entities: &[Entity],
    ) -> Result<Vec<RemoteId>, RemoteError> {
        (**self).create(kind, parent, entities)
    }

    fn update(&self, kind: EntityKind, entities: &[Entity]) -> Result<(), RemoteError> {
        (**self).update(kind, entities)
    }

    fn delete(&self, kind: EntityKind, ids: &[RemoteId]) -> Result<(), RemoteError> {
        (**self).delete(kind, ids)
    }

    fn inherited_candidates(
        &self,
        kind: EntityKind,
        parent: &Parent,
    ) -> Result<Vec<Entity>, RemoteError> {
        (**self).inherited_candidates(kind, parent)
    }
}
