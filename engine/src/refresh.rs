//! Comparison of recorded declarations with a live read of the remote.
//!
//! The remote can change behind our back: deleting an item also deletes
//! the triggers that reference it, and operators edit templates by hand.
//! [`prune_vanished`] drops recorded entities that no longer exist so the
//! driver never addresses a dead id; [`detect_drift`] lists every
//! difference for reporting.

use crate::{Entity, RemoteId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Recorded entities split by whether the remote still has them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pruned {
    /// Entities that still exist, plus those that were never created
    pub current: Vec<Entity>,
    /// Entities whose remote id is gone
    pub vanished: Vec<Entity>,
}

/// Keep the recorded entities whose remote id is among `live`.
///
/// Only ids are compared, so `live` may come from an ids-only read.
/// Entities without a remote id are kept; the driver creates them.
pub fn prune_vanished(recorded: Vec<Entity>, live: &[Entity]) -> Pruned {
    let live: HashSet<&str> = live
        .iter()
        .filter_map(Entity::remote_id)
        .map(String::as_str)
        .collect();

    let (current, vanished): (Vec<Entity>, Vec<Entity>) = recorded
        .into_iter()
        .partition(|e| e.remote_id().map_or(true, |id| live.contains(id.as_str())));

    if !vanished.is_empty() {
        debug!(count = vanished.len(), "recorded entities gone from remote");
    }
    Pruned { current, vanished }
}

/// Differences between the recorded and the live state of one collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Drift {
    /// Recorded entities whose live content differs, as (recorded, live)
    pub changed: Vec<(Entity, Entity)>,
    /// Recorded entities the remote no longer has
    pub vanished: Vec<Entity>,
    /// Local live entities no run created
    pub unmanaged: Vec<Entity>,
}

impl Drift {
    pub fn is_clean(&self) -> bool {
        self.changed.is_empty() && self.vanished.is_empty() && self.unmanaged.is_empty()
    }
}

/// Compare `recorded` with a full read of the same collection.
///
/// Inherited live entities belong to a linked template: their content is
/// not compared and they never count as unmanaged.
pub fn detect_drift(recorded: &[Entity], live: &[Entity]) -> Drift {
    let by_id: HashMap<&RemoteId, &Entity> = live
        .iter()
        .filter_map(|e| e.remote_id().map(|id| (id, e)))
        .collect();
    let known: HashSet<&RemoteId> = recorded.iter().filter_map(Entity::remote_id).collect();

    let mut drift = Drift::default();
    for entity in recorded {
        let Some(id) = entity.remote_id() else {
            continue;
        };
        match by_id.get(id) {
            None => drift.vanished.push(entity.clone()),
            Some(current) if !current.is_inherited() && !entity.same_content(current) => {
                drift.changed.push((entity.clone(), (*current).clone()));
            }
            Some(_) => {}
        }
    }

    drift.unmanaged = live
        .iter()
        .filter(|e| !e.is_inherited())
        .filter(|e| e.remote_id().is_some_and(|id| !known.contains(id)))
        .cloned()
        .collect();
    drift
}
