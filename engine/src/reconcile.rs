//! Reconciliation driver for one (parent, kind) collection.
//!
//! Given the previous and current declarations of a collection, this module
//! works out what changed and pushes it to the remote.
//!
//! # Algorithm
//!
//! 1. Partition the new declarations against the old ones
//! 2. Withhold inherited entities from the delete batch
//! 3. Create, then update, then delete, one bulk call each
//! 4. Stop at the first failing call and report how far the run got
//!
//! Calls already made are not undone. Re-running with the persisted state
//! converges, because the partition is recomputed from the declarations.

use crate::matcher::{MatchPolicy, Matcher, Partition};
use crate::protect::guard_deletes;
use crate::{
    Entity, EntityKind, Error, Parent, ParentId, RemoteCollection, RemoteError, RemoteId, Step,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Progress of one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Partition computed, nothing sent yet
    Computed,
    Created,
    Updated,
    Deleted,
    Done,
    FailedAtCreate,
    FailedAtUpdate,
    FailedAtDelete,
}

impl Stage {
    fn failed_at(step: Step) -> Self {
        match step {
            Step::Create => Stage::FailedAtCreate,
            Step::Update => Stage::FailedAtUpdate,
            Step::Delete => Stage::FailedAtDelete,
        }
    }
}

/// Input of one run: the previous and current declarations of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileRequest {
    pub kind: EntityKind,
    pub parent: Parent,
    /// Declarations persisted after the previous run, with remote ids
    pub old: Vec<Entity>,
    /// Current declarations, in declaration order
    pub new: Vec<Entity>,
}

impl ReconcileRequest {
    pub fn new(kind: EntityKind, parent: Parent, old: Vec<Entity>, new: Vec<Entity>) -> Self {
        Self {
            kind,
            parent,
            old,
            new,
        }
    }
}

/// What a run did, also returned alongside a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub kind: EntityKind,
    pub parent_id: ParentId,
    pub stage: Stage,
    /// Newly created entities, with their assigned ids
    pub created: Vec<Entity>,
    /// Entities sent in the update call
    pub updated: Vec<Entity>,
    /// Matched entities that needed no call
    pub unchanged: Vec<Entity>,
    pub deleted: Vec<RemoteId>,
    /// Ids withheld from deletion because a linked template owns them
    pub protected: Vec<RemoteId>,
    /// Old declarations of entities this run did not get to settle
    pub retained: Vec<Entity>,
}

impl ReconcileReport {
    fn new(kind: EntityKind, parent_id: ParentId) -> Self {
        Self {
            kind,
            parent_id,
            stage: Stage::Computed,
            created: Vec::new(),
            updated: Vec::new(),
            unchanged: Vec::new(),
            deleted: Vec::new(),
            protected: Vec::new(),
            retained: Vec::new(),
        }
    }

    /// Ids assigned by the create call.
    pub fn created_ids(&self) -> Vec<RemoteId> {
        self.created
            .iter()
            .filter_map(|e| e.remote_id().cloned())
            .collect()
    }

    /// Whether the run sent any mutating call.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Declarations the caller should store as the next run's old set.
    ///
    /// Every entry holds a remote id. After a failure this still covers
    /// everything created so far, so the next run does not create twice.
    pub fn persisted(&self) -> Vec<Entity> {
        self.unchanged
            .iter()
            .chain(&self.updated)
            .chain(&self.created)
            .chain(&self.retained)
            .filter(|e| e.has_remote_id())
            .cloned()
            .collect()
    }
}

/// A failed run: the first error and what happened before it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct ReconcileFailure {
    pub error: Error,
    pub partial: ReconcileReport,
}

impl ReconcileFailure {
    fn new(error: Error, mut partial: ReconcileReport) -> Self {
        if let Some(step) = error.step() {
            partial.stage = Stage::failed_at(step);
        }
        Self { error, partial }
    }
}

/// Drives create/update/delete calls for one collection at a time.
pub struct Reconciler<R> {
    remote: R,
    matcher: Matcher,
}

impl<R: RemoteCollection> Reconciler<R> {
    /// Create a reconciler with first-wins matching.
    pub fn new(remote: R) -> Self {
        Self {
            remote,
            matcher: Matcher::default(),
        }
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.matcher = Matcher::new(policy);
        self
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Partition without contacting the remote.
    pub fn plan(&self, old: Vec<Entity>, new: Vec<Entity>) -> crate::error::Result<Partition> {
        self.matcher.partition(old, new)
    }

    /// Reconcile one collection.
    ///
    /// Returns the report on success. On failure the report in
    /// [`ReconcileFailure::partial`] records the calls that did go through.
    pub fn reconcile(
        &self,
        request: ReconcileRequest,
    ) -> Result<ReconcileReport, ReconcileFailure> {
        let ReconcileRequest {
            kind,
            parent,
            old,
            mut new,
        } = request;
        let parent_id = parent.id().clone();
        let mut report = ReconcileReport::new(kind, parent_id.clone());
        // Until the partition exists, the old set is what is live
        report.retained = old.clone();

        if let Err(error) = check_request(kind, &parent, &old, &mut new) {
            return Err(ReconcileFailure::new(error, report));
        }

        let partition = match self.matcher.partition(old, new) {
            Ok(partition) => partition,
            Err(error) => return Err(ReconcileFailure::new(error, report)),
        };
        let (mut creates, updates, deletes) = partition.into_parts();

        let mut pending_updates = Vec::new();
        let mut superseded = Vec::new();
        // Inherited entities matched by a declaration: never mutated
        let mut held = Vec::new();
        for (entity, previous) in updates {
            if !entity.has_remote_id() {
                // Matched a declaration that never made it to the remote
                creates.push(entity);
            } else if previous.is_inherited() {
                report.protected.extend(previous.remote_id().cloned());
                held.push(previous);
            } else if entity.same_content(&previous) {
                report.unchanged.push(entity);
            } else {
                pending_updates.push(entity);
                superseded.push(previous);
            }
        }
        let deletes: Vec<Entity> = deletes.into_iter().filter(Entity::has_remote_id).collect();

        report.retained = superseded.iter().chain(&held).chain(&deletes).cloned().collect();

        let deletes = if deletes.is_empty() {
            deletes
        } else {
            match guard_deletes(&self.remote, kind, &parent, deletes) {
                Ok(protection) => {
                    report.protected.extend(protection.protected);
                    protection.kept
                }
                Err(error) => {
                    warn!(%kind, %parent_id, %error, "inherited lookup failed, nothing sent");
                    return Err(ReconcileFailure::new(error, report));
                }
            }
        };
        report.retained = superseded.iter().chain(&held).chain(&deletes).cloned().collect();

        debug!(
            %kind,
            %parent_id,
            create = creates.len(),
            update = pending_updates.len(),
            unchanged = report.unchanged.len(),
            delete = deletes.len(),
            protected = report.protected.len(),
            "reconciliation planned"
        );

        // Create
        if !creates.is_empty() {
            match self.create(kind, &parent, creates) {
                Ok(created) => {
                    info!(%kind, %parent_id, count = created.len(), "created");
                    report.created = created;
                }
                Err(error) => return Err(ReconcileFailure::new(error, report)),
            }
        }
        report.stage = Stage::Created;

        // Update
        if !pending_updates.is_empty() {
            if let Err(source) = self.remote.update(kind, &pending_updates) {
                let error =
                    mutation(kind, &parent_id, Step::Update, ids_of(&pending_updates), source);
                return Err(ReconcileFailure::new(error, report));
            }
            info!(%kind, %parent_id, count = pending_updates.len(), "updated");
            report.updated = pending_updates;
        }
        report.retained = held.iter().chain(&deletes).cloned().collect();
        report.stage = Stage::Updated;

        // Delete
        if !deletes.is_empty() {
            let ids = ids_of(&deletes);
            if let Err(source) = self.remote.delete(kind, &ids) {
                let error = mutation(kind, &parent_id, Step::Delete, ids, source);
                return Err(ReconcileFailure::new(error, report));
            }
            info!(%kind, %parent_id, count = ids.len(), "deleted");
            report.deleted = ids;
        }
        report.retained = held;
        report.stage = Stage::Deleted;

        debug!(%kind, %parent_id, protected = report.protected.len(), "reconciliation done");
        report.stage = Stage::Done;
        Ok(report)
    }

    fn create(
        &self,
        kind: EntityKind,
        parent: &Parent,
        mut entities: Vec<Entity>,
    ) -> crate::error::Result<Vec<Entity>> {
        let names = || entities.iter().map(|e| e.name.clone()).collect::<Vec<_>>();

        let ids = self
            .remote
            .create(kind, parent, &entities)
            .map_err(|source| mutation(kind, parent.id(), Step::Create, names(), source))?;

        if ids.len() != entities.len() {
            let source = RemoteError::new(format!(
                "remote returned {} ids for {} created entities",
                ids.len(),
                entities.len()
            ));
            return Err(mutation(kind, parent.id(), Step::Create, names(), source));
        }

        for (entity, id) in entities.iter_mut().zip(ids) {
            entity.remote_id = Some(id);
        }
        Ok(entities)
    }
}

/// Reject requests the remote would refuse anyway, before any call.
fn check_request(
    kind: EntityKind,
    parent: &Parent,
    old: &[Entity],
    new: &mut [Entity],
) -> crate::error::Result<()> {
    if !kind.accepts(parent) {
        return Err(Error::InvalidRequest(format!(
            "{} cannot be reconciled under {:?}",
            kind, parent
        )));
    }
    if let Some(stray) = old.iter().chain(new.iter()).find(|e| e.kind() != kind) {
        return Err(Error::InvalidRequest(format!(
            "{} '{}' passed to a {} reconciliation",
            stray.kind(),
            stray.name,
            kind
        )));
    }
    for entity in new.iter_mut() {
        entity.validate()?;
        if entity.parent_id.is_empty() {
            entity.parent_id = parent.id().clone();
        }
    }
    Ok(())
}

fn ids_of(entities: &[Entity]) -> Vec<RemoteId> {
    entities
        .iter()
        .filter_map(|e| e.remote_id().cloned())
        .collect()
}

fn mutation(
    kind: EntityKind,
    parent_id: &ParentId,
    step: Step,
    batch: Vec<String>,
    source: RemoteError,
) -> Error {
    warn!(%kind, %parent_id, %step, %source, "remote call failed");
    Error::Mutation {
        kind,
        parent_id: parent_id.clone(),
        step,
        batch,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ItemFields, Origin, Query, TriggerFields};
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Get(Option<bool>),
        Create(Vec<String>),
        Update(Vec<RemoteId>),
        Delete(Vec<RemoteId>),
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<Call>>,
        inherited: Vec<Entity>,
        fail: Option<&'static str>,
        next_id: RefCell<u32>,
    }

    impl Recorder {
        fn failing(step: &'static str) -> Self {
            Self {
                fail: Some(step),
                ..Self::default()
            }
        }

        fn outcome(&self, step: &str) -> Result<(), RemoteError> {
            match self.fail {
                Some(failing) if failing == step => {
                    Err(RemoteError::new(format!("{} refused", step)))
                }
                _ => Ok(()),
            }
        }
    }

    impl RemoteCollection for Recorder {
        fn get(&self, query: &Query) -> Result<Vec<Entity>, RemoteError> {
            self.calls.borrow_mut().push(Call::Get(query.inherited));
            self.outcome("get")?;
            Ok(self.inherited.clone())
        }

        fn create(
            &self,
            _: EntityKind,
            _: &Parent,
            entities: &[Entity],
        ) -> Result<Vec<RemoteId>, RemoteError> {
            self.calls
                .borrow_mut()
                .push(Call::Create(entities.iter().map(|e| e.name.clone()).collect()));
            self.outcome("create")?;
            let mut next = self.next_id.borrow_mut();
            Ok(entities
                .iter()
                .map(|_| {
                    *next += 1;
                    format!("n{}", next)
                })
                .collect())
        }

        fn update(&self, _: EntityKind, entities: &[Entity]) -> Result<(), RemoteError> {
            self.calls.borrow_mut().push(Call::Update(ids_of(entities)));
            self.outcome("update")
        }

        fn delete(&self, _: EntityKind, ids: &[RemoteId]) -> Result<(), RemoteError> {
            self.calls.borrow_mut().push(Call::Delete(ids.to_vec()));
            self.outcome("delete")
        }
    }

    fn template() -> Parent {
        Parent::template("10001")
    }

    fn item(name: &str, key: &str) -> Entity {
        Entity::item(name, key, "10001", ItemFields::default())
    }

    fn stored(id: &str, name: &str, key: &str) -> Entity {
        item(name, key).with_remote_id(id)
    }

    fn request(old: Vec<Entity>, new: Vec<Entity>) -> ReconcileRequest {
        ReconcileRequest::new(EntityKind::Item, template(), old, new)
    }

    #[test]
    fn calls_run_create_update_delete() {
        let remote = Recorder::default();
        let reconciler = Reconciler::new(&remote);

        let report = reconciler
            .reconcile(request(
                vec![stored("1", "a", "k1"), stored("2", "gone", "k2")],
                vec![item("a", "k1"), item("fresh", "k3")],
            ))
            .unwrap();

        // "a" is unchanged, so only create and delete go out
        assert_eq!(
            *remote.calls.borrow(),
            vec![
                Call::Create(vec!["fresh".into()]),
                Call::Delete(vec!["2".into()]),
            ]
        );
        assert_eq!(report.stage, Stage::Done);
        assert_eq!(report.created_ids(), vec!["n1".to_string()]);
        assert_eq!(report.unchanged.len(), 1);
        assert_eq!(report.deleted, vec!["2".to_string()]);
    }

    #[test]
    fn update_goes_between_create_and_delete() {
        let remote = Recorder::default();
        let reconciler = Reconciler::new(&remote);

        reconciler
            .reconcile(request(
                vec![stored("1", "a", "k1"), stored("2", "b", "k2")],
                vec![item("renamed", "k1"), item("c", "k3")],
            ))
            .unwrap();

        assert_eq!(
            *remote.calls.borrow(),
            vec![
                Call::Create(vec!["c".into()]),
                Call::Update(vec!["1".into()]),
                Call::Delete(vec!["2".into()]),
            ]
        );
    }

    #[test]
    fn unchanged_set_sends_nothing() {
        let remote = Recorder::default();
        let reconciler = Reconciler::new(&remote);
        let set = vec![stored("1", "a", "k1"), stored("2", "b", "k2")];

        let report = reconciler.reconcile(request(set.clone(), set.clone())).unwrap();

        assert!(remote.calls.borrow().is_empty());
        assert!(report.is_noop());
        assert_eq!(report.persisted(), set);
    }

    #[test]
    fn create_failure_stops_the_run() {
        let remote = Recorder::failing("create");
        let reconciler = Reconciler::new(&remote);

        let failure = reconciler
            .reconcile(request(
                vec![stored("1", "a", "k1"), stored("2", "b", "k2")],
                vec![item("a2", "k1"), item("new", "k9")],
            ))
            .unwrap_err();

        assert_eq!(*remote.calls.borrow(), vec![Call::Create(vec!["new".into()])]);
        assert_eq!(failure.partial.stage, Stage::FailedAtCreate);
        assert_eq!(failure.error.step(), Some(Step::Create));
        // Nothing settled: the old declarations stay as they were
        assert_eq!(
            failure.partial.persisted(),
            vec![stored("1", "a", "k1"), stored("2", "b", "k2")]
        );
    }

    #[test]
    fn update_failure_keeps_created_ids() {
        let remote = Recorder::failing("update");
        let reconciler = Reconciler::new(&remote);

        let failure = reconciler
            .reconcile(request(
                vec![stored("1", "a", "k1"), stored("2", "b", "k2")],
                vec![item("a2", "k1"), item("new", "k9")],
            ))
            .unwrap_err();

        assert_eq!(failure.partial.stage, Stage::FailedAtUpdate);
        assert_eq!(
            *remote.calls.borrow(),
            vec![Call::Create(vec!["new".into()]), Call::Update(vec!["1".into()])]
        );
        let persisted = failure.partial.persisted();
        assert!(persisted.contains(&item("new", "k9").with_remote_id("n1")));
        // The failed update keeps its old declaration so it is retried
        assert!(persisted.contains(&stored("1", "a", "k1")));
        assert!(persisted.contains(&stored("2", "b", "k2")));
    }

    #[test]
    fn delete_failure_reports_batch() {
        let remote = Recorder::failing("delete");
        let reconciler = Reconciler::new(&remote);

        let failure = reconciler
            .reconcile(request(vec![stored("7", "x", "kx")], vec![]))
            .unwrap_err();

        assert_eq!(failure.partial.stage, Stage::FailedAtDelete);
        match &failure.error {
            Error::Mutation { step, batch, .. } => {
                assert_eq!(*step, Step::Delete);
                assert_eq!(batch, &vec!["7".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(failure.partial.persisted(), vec![stored("7", "x", "kx")]);
    }

    #[test]
    fn inherited_prototypes_are_not_deleted() {
        let rule = Parent::discovery_rule("30001", "10001");
        let proto = |id: &str, name: &str| {
            Entity::item_prototype(
                name,
                format!("{}[{{#FS}}]", name),
                "30001",
                ItemFields::default(),
            )
            .with_remote_id(id)
        };
        let remote = Recorder {
            inherited: vec![proto("1", "linked")],
            ..Recorder::default()
        };
        let reconciler = Reconciler::new(&remote);

        let report = reconciler
            .reconcile(ReconcileRequest::new(
                EntityKind::ItemPrototype,
                rule,
                vec![proto("1", "linked"), proto("2", "own")],
                vec![],
            ))
            .unwrap();

        assert_eq!(
            *remote.calls.borrow(),
            vec![Call::Get(Some(true)), Call::Delete(vec!["2".into()])]
        );
        assert_eq!(report.protected, vec!["1".to_string()]);
        assert_eq!(report.deleted, vec!["2".to_string()]);
    }

    #[test]
    fn inherited_origin_never_reaches_delete() {
        let remote = Recorder::default();
        let reconciler = Reconciler::new(&remote);

        let report = reconciler
            .reconcile(request(
                vec![stored("1", "a", "k").with_origin(Origin::Inherited)],
                vec![],
            ))
            .unwrap();

        assert!(remote.calls.borrow().is_empty());
        assert_eq!(report.protected, vec!["1".to_string()]);
    }

    #[test]
    fn inherited_match_is_never_updated() {
        let remote = Recorder::default();
        let reconciler = Reconciler::new(&remote);
        let linked = stored("4", "a", "k").with_origin(Origin::Inherited);

        let report = reconciler
            .reconcile(request(vec![linked.clone()], vec![item("a", "k2")]))
            .unwrap();

        assert!(remote.calls.borrow().is_empty());
        assert_eq!(report.protected, vec!["4".to_string()]);
        assert_eq!(report.persisted(), vec![linked]);
    }

    #[test]
    fn lookup_failure_sends_no_mutation() {
        let remote = Recorder::failing("get");
        let reconciler = Reconciler::new(&remote);
        let rule = Parent::discovery_rule("30001", "10001");
        let proto = Entity::trigger_prototype("p", "e", "30001", TriggerFields::default())
            .with_remote_id("9");

        let failure = reconciler
            .reconcile(ReconcileRequest::new(
                EntityKind::TriggerPrototype,
                rule,
                vec![proto.clone()],
                vec![Entity::trigger_prototype("new", "e2", "30001", TriggerFields::default())],
            ))
            .unwrap_err();

        assert!(matches!(failure.error, Error::Lookup { .. }));
        assert_eq!(failure.partial.stage, Stage::Computed);
        assert_eq!(*remote.calls.borrow(), vec![Call::Get(Some(true))]);
        assert_eq!(failure.partial.persisted(), vec![proto]);
    }

    #[test]
    fn match_without_remote_id_is_created() {
        let remote = Recorder::default();
        let reconciler = Reconciler::new(&remote);

        let report = reconciler
            .reconcile(request(vec![item("a", "k")], vec![item("a", "k")]))
            .unwrap();

        assert_eq!(*remote.calls.borrow(), vec![Call::Create(vec!["a".into()])]);
        assert_eq!(report.created_ids(), vec!["n1".to_string()]);
    }

    #[test]
    fn wrong_parent_shape_is_rejected() {
        let remote = Recorder::default();
        let reconciler = Reconciler::new(&remote);

        let failure = reconciler
            .reconcile(ReconcileRequest::new(
                EntityKind::ItemPrototype,
                template(),
                vec![],
                vec![],
            ))
            .unwrap_err();

        assert!(matches!(failure.error, Error::InvalidRequest(_)));
        assert!(remote.calls.borrow().is_empty());
    }

    #[test]
    fn mixed_kinds_are_rejected() {
        let remote = Recorder::default();
        let reconciler = Reconciler::new(&remote);
        let trigger = Entity::trigger("t", "e", "10001", TriggerFields::default());

        let failure = reconciler.reconcile(request(vec![], vec![trigger])).unwrap_err();
        assert!(matches!(failure.error, Error::InvalidRequest(_)));
    }

    #[test]
    fn strict_policy_surfaces_ambiguity() {
        let remote = Recorder::default();
        let reconciler = Reconciler::new(&remote).with_policy(MatchPolicy::RejectAmbiguous);

        let failure = reconciler
            .reconcile(request(
                vec![stored("1", "a", "k1"), stored("2", "a", "k2")],
                vec![item("a", "k3")],
            ))
            .unwrap_err();

        assert!(matches!(failure.error, Error::AmbiguousMatch { .. }));
        assert!(remote.calls.borrow().is_empty());
    }

    #[test]
    fn new_entities_inherit_parent_id() {
        let remote = Recorder::default();
        let reconciler = Reconciler::new(&remote);

        let report = reconciler
            .reconcile(request(vec![], vec![Entity::item("a", "k", "", ItemFields::default())]))
            .unwrap();
        assert_eq!(report.created[0].parent_id, "10001");
    }
}
