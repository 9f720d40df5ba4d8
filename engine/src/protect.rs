//! Guard that keeps inherited entities out of delete requests.
//!
//! A discovery rule can carry prototypes materialized from a linked ancestor
//! template. They show up in the live set but belong to the ancestor, so a
//! local declaration dropping them must not destroy them.

use crate::error::Result;
use crate::{Entity, EntityKind, Error, Parent, RemoteCollection, RemoteId};
use std::collections::HashSet;
use tracing::debug;

/// Outcome of filtering a delete batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Protection {
    /// Entities still safe to delete
    pub kept: Vec<Entity>,
    /// Remote ids withheld from deletion
    pub protected: Vec<RemoteId>,
}

/// Drop from `to_delete` every entity marked inherited or whose remote id
/// is among `candidates`.
pub fn filter_inherited(to_delete: Vec<Entity>, candidates: &[Entity]) -> Protection {
    let inherited: HashSet<&str> = candidates
        .iter()
        .filter_map(|c| c.remote_id())
        .map(String::as_str)
        .collect();

    let mut protection = Protection::default();
    for entity in to_delete {
        let listed = entity
            .remote_id()
            .is_some_and(|id| inherited.contains(id.as_str()));
        if entity.is_inherited() || listed {
            protection
                .protected
                .extend(entity.remote_id().cloned());
        } else {
            protection.kept.push(entity);
        }
    }
    protection
}

/// Prune `to_delete` before it reaches the remote.
///
/// Entities whose own origin is inherited are dropped without a fetch. For
/// kinds that support inheritance, one inherited-candidate fetch covers the
/// rest of the batch; if it fails nothing is deleted and the lookup error is
/// returned.
pub fn guard_deletes<R: RemoteCollection + ?Sized>(
    remote: &R,
    kind: EntityKind,
    parent: &Parent,
    to_delete: Vec<Entity>,
) -> Result<Protection> {
    let mut protection = filter_inherited(to_delete, &[]);
    if protection.kept.is_empty() || !kind.supports_inheritance() {
        return Ok(protection);
    }

    let candidates = remote
        .inherited_candidates(kind, parent)
        .map_err(|source| Error::Lookup {
            kind,
            parent_id: parent.id().clone(),
            source,
        })?;

    let fetched = filter_inherited(protection.kept, &candidates);
    protection.kept = fetched.kept;
    protection.protected.extend(fetched.protected);

    if !protection.protected.is_empty() {
        debug!(
            %kind,
            parent_id = %parent.id(),
            protected = ?protection.protected,
            "withholding inherited entities from delete"
        );
    }
    Ok(protection)
}
