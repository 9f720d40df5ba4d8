//! Reconcile the server with a manifest.

use crate::client::ZabbixClient;
use crate::config::Config;
use crate::error::Result;
use crate::manifest::Manifest;
use crate::state;
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zabbix_sync_engine::{
    prune_vanished, Entity, EntityKind, MatchPolicy, Parent, Query, ReconcileReport,
    ReconcileRequest, Reconciler, StateSnapshot,
};

/// Apply a manifest to the Zabbix server
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Path to the manifest file
    #[arg(short = 'f', long)]
    pub manifest: PathBuf,

    /// Path to the state file
    #[arg(short, long, default_value = "zabbix-sync.state.json")]
    pub state: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Reports of every collection an apply touched.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    pub reports: Vec<ReconcileReport>,
}

impl ApplySummary {
    pub fn created(&self) -> usize {
        self.reports.iter().map(|r| r.created.len()).sum()
    }

    pub fn updated(&self) -> usize {
        self.reports.iter().map(|r| r.updated.len()).sum()
    }

    pub fn deleted(&self) -> usize {
        self.reports.iter().map(|r| r.deleted.len()).sum()
    }

    pub fn protected(&self) -> usize {
        self.reports.iter().map(|r| r.protected.len()).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.reports.iter().all(ReconcileReport::is_noop)
    }
}

/// Execute the apply command
pub fn execute(args: ApplyArgs) -> Result<()> {
    let config = Config::from_env()?;
    let client = ZabbixClient::connect(&config)?;
    let manifest = Manifest::load(&args.manifest)?;

    let summary = apply(&client, &manifest, &args.state, config.match_policy())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if summary.is_noop() {
        println!("No changes. Zabbix matches the manifest.");
    } else {
        println!(
            "Apply complete: {} created, {} updated, {} deleted, {} inherited left in place.",
            summary.created(),
            summary.updated(),
            summary.deleted(),
            summary.protected()
        );
    }
    Ok(())
}

/// Reconcile every collection of `manifest`, then every collection the
/// state still records but the manifest dropped.
///
/// The state file is rewritten after each collection, including the one
/// that failed, so a re-run never creates an entity twice. Recorded
/// entities the server lost since (triggers of a deleted item, manual
/// deletes) are forgotten before each collection is reconciled.
pub fn apply(
    client: &ZabbixClient,
    manifest: &Manifest,
    state_path: &Path,
    policy: MatchPolicy,
) -> Result<ApplySummary> {
    let mut snapshot = state::load(state_path)?;
    let collections = manifest.collections(|host| {
        let template_id = client.template_id(host)?;
        snapshot.record_alias(host, template_id.clone());
        Ok(template_id)
    })?;

    let reconciler = Reconciler::new(client).with_policy(policy);
    let mut summary = ApplySummary::default();
    let mut keep = Vec::new();

    for collection in collections {
        keep.push((collection.parent.clone(), collection.kind));
        let old = snapshot.entities(&collection.parent, collection.kind);
        if old.is_empty() && collection.entities.is_empty() {
            continue;
        }

        let report = run(
            &reconciler,
            &mut snapshot,
            state_path,
            collection.parent,
            collection.kind,
            old,
            collection.entities,
        )?;
        summary.reports.push(report);
    }

    // Triggers go first: deleting an item also removes its triggers
    let mut orphans: Vec<(Parent, EntityKind, Vec<Entity>)> = snapshot
        .orphaned(&keep)
        .map(|c| (c.parent.clone(), c.kind, c.entities.clone()))
        .collect();
    orphans.sort_by_key(|(_, kind, _)| {
        !matches!(kind, EntityKind::Trigger | EntityKind::TriggerPrototype)
    });

    for (parent, kind, old) in orphans {
        info!(parent_id = %parent.id(), %kind, "collection dropped from manifest");
        let report = run(
            &reconciler,
            &mut snapshot,
            state_path,
            parent.clone(),
            kind,
            old,
            Vec::new(),
        )?;
        snapshot.remove(&parent, kind);
        state::save(state_path, &snapshot)?;
        summary.reports.push(report);
    }

    Ok(summary)
}

/// Reconcile one collection and persist its outcome, successful or not.
fn run(
    reconciler: &Reconciler<&ZabbixClient>,
    snapshot: &mut StateSnapshot,
    state_path: &Path,
    parent: Parent,
    kind: EntityKind,
    old: Vec<Entity>,
    new: Vec<Entity>,
) -> Result<ReconcileReport> {
    let old = refresh(reconciler.remote(), &parent, kind, old)?;
    let request = ReconcileRequest::new(kind, parent.clone(), old, new);

    match reconciler.reconcile(request) {
        Ok(report) => {
            snapshot.record(&parent, kind, report.persisted(), state::now());
            state::save(state_path, snapshot)?;
            Ok(report)
        }
        Err(failure) => {
            warn!(
                parent_id = %parent.id(),
                %kind,
                stage = ?failure.partial.stage,
                "reconciliation stopped, saving partial state"
            );
            snapshot.record(&parent, kind, failure.partial.persisted(), state::now());
            state::save(state_path, snapshot)?;
            Err(failure.into())
        }
    }
}

/// Drop recorded entities the server no longer has.
///
/// One ids-only read, skipped when nothing recorded holds an id.
fn refresh(
    client: &ZabbixClient,
    parent: &Parent,
    kind: EntityKind,
    old: Vec<Entity>,
) -> Result<Vec<Entity>> {
    if !old.iter().any(Entity::has_remote_id) {
        return Ok(old);
    }

    let live = client.fetch(&Query::live_ids(kind, parent.clone()))?;
    let pruned = prune_vanished(old, &live);
    for gone in &pruned.vanished {
        info!(
            parent_id = %parent.id(),
            %kind,
            name = %gone.name,
            remote_id = gone.remote_id().map(String::as_str).unwrap_or_default(),
            "no longer on the server, forgetting it"
        );
    }
    Ok(pruned.current)
}
