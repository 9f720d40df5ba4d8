//! Identity resolution between two declared sets of one collection.
//!
//! The remote only hands out ids at creation time and the declared
//! configuration has no element identity of its own, so an old declaration
//! and a new one are paired heuristically.
//!
//! # Algorithm
//!
//! 1. For each new entity, in order, take the first unconsumed old entity
//!    with the same name.
//! 2. For each new entity still unmatched, take the first unconsumed old
//!    entity with the same key.
//! 3. Unmatched new entities are created, unconsumed old entities deleted.
//!
//! A rename keeps the key and a re-key keeps the name, so both resolve to an
//! update. Changing both at once is a replacement.

use crate::error::{MatchField, Result};
use crate::{Entity, EntityKind, Error};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What to do when several old entities qualify for one new entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Take the first candidate in old-set order (default)
    #[default]
    FirstWins,
    /// Fail with [`Error::AmbiguousMatch`]
    RejectAmbiguous,
}

/// Three-way split of a new declared set against an old one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Partition {
    /// New entities with no counterpart
    pub to_create: Vec<Entity>,
    /// New entities carrying the remote id of the old entity they matched
    pub to_update: Vec<Entity>,
    /// Old entities nothing matched
    pub to_delete: Vec<Entity>,
    /// Parallel to `to_update`: the old declaration each entry matched
    matched: Vec<Entity>,
}

impl Partition {
    /// Updates whose content actually differs from the old declaration.
    pub fn changed_updates(&self) -> impl Iterator<Item = &Entity> {
        self.to_update
            .iter()
            .zip(&self.matched)
            .filter(|(entity, previous)| !entity.same_content(previous))
            .map(|(entity, _)| entity)
    }

    /// Number of matched entities identical to their old declaration.
    pub fn unchanged_count(&self) -> usize {
        self.to_update
            .iter()
            .zip(&self.matched)
            .filter(|(entity, previous)| entity.same_content(previous))
            .count()
    }

    /// Whether applying this partition needs no mutating call.
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty()
            && self.to_delete.is_empty()
            && self.unchanged_count() == self.to_update.len()
    }

    /// Split into `(to_create, (update, matched old declaration), to_delete)`.
    pub fn into_parts(self) -> (Vec<Entity>, Vec<(Entity, Entity)>, Vec<Entity>) {
        let updates = self.to_update.into_iter().zip(self.matched).collect();
        (self.to_create, updates, self.to_delete)
    }
}

/// Pairs old and new declarations of one collection kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher {
    policy: MatchPolicy,
}

impl Matcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    /// Partition `new` against `old`.
    ///
    /// Both sets must belong to the same parent and kind; that is not
    /// re-checked here. Iteration order decides ties, so callers pass
    /// declaration order.
    pub fn partition(&self, old: Vec<Entity>, new: Vec<Entity>) -> Result<Partition> {
        let mut consumed = vec![false; old.len()];
        let mut matches: Vec<Option<usize>> = vec![None; new.len()];
        // New-set indices in the order they were matched
        let mut match_order = Vec::with_capacity(new.len());

        for field in [MatchField::Name, MatchField::Key] {
            for (new_idx, candidate) in new.iter().enumerate() {
                if matches[new_idx].is_some() {
                    continue;
                }
                let wanted = field_value(field, candidate);
                let mut hits = old
                    .iter()
                    .enumerate()
                    .filter(|(old_idx, o)| !consumed[*old_idx] && field_value(field, o) == wanted)
                    .map(|(old_idx, _)| old_idx);

                let Some(first) = hits.next() else {
                    continue;
                };
                if self.policy == MatchPolicy::RejectAmbiguous {
                    let rest: Vec<usize> = hits.collect();
                    if !rest.is_empty() {
                        return Err(ambiguous(candidate.kind(), field, wanted, &old, first, &rest));
                    }
                }

                consumed[first] = true;
                matches[new_idx] = Some(first);
                match_order.push(new_idx);
            }
        }

        let mut new: Vec<Option<Entity>> = new.into_iter().map(Some).collect();
        let mut partition = Partition::default();

        for new_idx in match_order {
            let Some(old_idx) = matches[new_idx] else {
                continue;
            };
            let Some(mut entity) = new[new_idx].take() else {
                continue;
            };
            let previous = old[old_idx].clone();
            entity.remote_id = previous.remote_id.clone();
            partition.to_update.push(entity);
            partition.matched.push(previous);
        }

        partition.to_create = new.into_iter().flatten().collect();
        partition.to_delete = old
            .into_iter()
            .zip(consumed)
            .filter(|(_, used)| !used)
            .map(|(entity, _)| entity)
            .collect();

        debug!(
            create = partition.to_create.len(),
            update = partition.to_update.len(),
            unchanged = partition.unchanged_count(),
            delete = partition.to_delete.len(),
            "partitioned declared set"
        );

        Ok(partition)
    }
}

/// Partition with [`MatchPolicy::FirstWins`], which cannot fail.
pub fn partition(old: Vec<Entity>, new: Vec<Entity>) -> Partition {
    // FirstWins never reports ambiguity
    Matcher::new(MatchPolicy::FirstWins)
        .partition(old, new)
        .unwrap_or_default()
}

fn field_value(field: MatchField, entity: &Entity) -> &str {
    match field {
        MatchField::Name => &entity.name,
        MatchField::Key => &entity.key,
    }
}

fn ambiguous(
    kind: EntityKind,
    field: MatchField,
    value: &str,
    old: &[Entity],
    first: usize,
    rest: &[usize],
) -> Error {
    let candidates = std::iter::once(first)
        .chain(rest.iter().copied())
        .map(|idx| old[idx].remote_id.clone().unwrap_or_else(|| "-".to_string()))
        .collect();
    Error::AmbiguousMatch {
        kind,
        field,
        value: value.to_string(),
        candidates,
    }
}
