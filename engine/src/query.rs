//! Typed request shaping for remote reads.
//!
//! Every read the engine issues is a [`Query`]: one kind, one parent, and an
//! explicit set of filters. Transports translate it into their own wire
//! parameters.

use crate::{EntityKind, Parent};
use serde::{Deserialize, Serialize};

/// How much of each entity the remote should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    /// Every field
    #[default]
    Extend,
    /// Only ids and origin, enough for existence and inheritance checks
    IdsOnly,
}

/// A scoped read of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub kind: EntityKind,
    pub parent: Parent,
    /// `Some(true)`: only entities inherited from a linked template.
    /// `Some(false)`: only entities declared on the parent itself.
    pub inherited: Option<bool>,
    pub output: Output,
    /// Return trigger expressions with item references expanded
    pub expand_expression: bool,
    /// Include trigger dependencies
    pub select_dependencies: bool,
}

impl Query {
    /// Read every entity of `kind` under `parent`, with all fields.
    pub fn all(kind: EntityKind, parent: Parent) -> Self {
        let is_trigger = matches!(kind, EntityKind::Trigger | EntityKind::TriggerPrototype);
        Self {
            kind,
            parent,
            inherited: None,
            output: Output::Extend,
            expand_expression: is_trigger,
            select_dependencies: is_trigger,
        }
    }

    /// Read the ids of entities materialized from a linked template.
    pub fn inherited_candidates(kind: EntityKind, parent: Parent) -> Self {
        Self {
            kind,
            parent,
            inherited: Some(true),
            output: Output::IdsOnly,
            expand_expression: false,
            select_dependencies: false,
        }
    }

    /// Read the ids of every entity of `kind` under `parent`.
    pub fn live_ids(kind: EntityKind, parent: Parent) -> Self {
        Self {
            kind,
            parent,
            inherited: None,
            output: Output::IdsOnly,
            expand_expression: false,
            select_dependencies: false,
        }
    }
}
