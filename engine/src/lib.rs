//! # zabbix-sync engine
//!
//! Reconciliation of nested collections on a Zabbix server: the items and
//! triggers of a template, and the item and trigger prototypes of a
//! low-level discovery rule.
//!
//! The remote only offers bulk get/create/update/delete-by-id, assigns ids
//! at creation time, and may materialize children inherited from a linked
//! template. This crate turns "what was declared last time" and "what is
//! declared now" into the right sequence of those calls.
//!
//! ## Design Principles
//!
//! - **No IO of its own**: the remote sits behind [`RemoteCollection`]
//! - **Deterministic**: the same declarations in the same order always
//!   produce the same partition
//! - **Fail-closed deletes**: an entity is only deleted when it is provably
//!   not inherited
//!
//! ## Core Concepts
//!
//! ### Entities
//!
//! An [`Entity`] has an identity (`remote_id`, `name`, `key`) and a typed
//! payload ([`EntityBody`]). Only the identity takes part in matching.
//!
//! ### Matching
//!
//! The [`Matcher`] pairs new declarations with old ones, first by name and
//! then by key, producing a [`Partition`] of creates, updates and deletes.
//!
//! ### Protection
//!
//! [`guard_deletes`] removes inherited entities from the delete batch,
//! fetching the inherited candidates once per run for prototype kinds.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] runs match, guard, create, update and delete in that
//! order and stops at the first failure, reporting what was done.
//!
//! ### Refresh
//!
//! The remote can lose entities on its own, for instance the triggers of a
//! deleted item. [`prune_vanished`] forgets recorded entities whose id is
//! gone before the next run; [`detect_drift`] reports every difference
//! between recorded and live state.
//!
//! ## Quick Start
//!
//! ```rust
//! use zabbix_sync_engine::{matcher, Entity, ItemFields};
//!
//! let old = vec![
//!     Entity::item("CPU load", "system.cpu.load", "10001", ItemFields::default())
//!         .with_remote_id("23001"),
//! ];
//! // Renamed, same key: resolves to an update of 23001
//! let new = vec![Entity::item(
//!     "Processor load",
//!     "system.cpu.load",
//!     "10001",
//!     ItemFields::default(),
//! )];
//!
//! let partition = matcher::partition(old, new);
//! assert!(partition.to_create.is_empty());
//! assert!(partition.to_delete.is_empty());
//! assert_eq!(partition.to_update[0].remote_id.as_deref(), Some("23001"));
//! ```
//!
//! ## Persistence
//!
//! [`StateSnapshot`] stores the settled declarations between runs; see
//! [`ReconcileReport::persisted`].

pub mod entity;
pub mod error;
pub mod matcher;
pub mod protect;
pub mod query;
pub mod reconcile;
pub mod refresh;
pub mod remote;
pub mod snapshot;

// Re-export main types at crate root
pub use entity::{
    Entity, EntityBody, EntityKind, ItemFields, Origin, Parent, TriggerFields, MAX_PRIORITY,
};
pub use error::{Error, MatchField, RemoteError, Step};
pub use matcher::{MatchPolicy, Matcher, Partition};
pub use protect::{filter_inherited, guard_deletes, Protection};
pub use query::{Output, Query};
pub use reconcile::{ReconcileFailure, ReconcileReport, ReconcileRequest, Reconciler, Stage};
pub use refresh::{detect_drift, prune_vanished, Drift, Pruned};
pub use remote::RemoteCollection;
pub use snapshot::{CollectionState, StateSnapshot, SNAPSHOT_FORMAT_VERSION};

/// Type aliases for clarity
pub type RemoteId = String;
pub type ParentId = String;
pub type Timestamp = u64;
