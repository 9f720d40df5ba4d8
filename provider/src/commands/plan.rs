//! Show what `apply` would do.
//!
//! The plan itself is computed offline from the manifest and the state
//! file. `--live` additionally reads every recorded collection from the
//! server and reports drift.

use crate::client::ZabbixClient;
use crate::config::Config;
use crate::error::Result;
use crate::manifest::Manifest;
use crate::state;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use zabbix_sync_engine::{
    detect_drift, Entity, EntityKind, MatchPolicy, Matcher, Parent, ParentId, Query,
    StateSnapshot,
};

/// Preview the changes a manifest implies against the recorded state
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the manifest file
    #[arg(short = 'f', long)]
    pub manifest: PathBuf,

    /// Path to the state file
    #[arg(short, long, default_value = "zabbix-sync.state.json")]
    pub state: PathBuf,

    /// Refuse ambiguous matches instead of taking the first candidate
    #[arg(long)]
    pub strict: bool,

    /// Also compare the recorded state with the server
    #[arg(long)]
    pub live: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Planned changes for one (parent, kind) collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPlan {
    pub parent_id: ParentId,
    pub kind: EntityKind,
    pub create: Vec<String>,
    pub update: Vec<String>,
    pub unchanged: usize,
    pub delete: Vec<String>,
    /// Set when the template host was never resolved by an apply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved_host: Option<String>,
}

impl CollectionPlan {
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Differences between the state file and the server for one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDrift {
    pub parent_id: ParentId,
    pub kind: EntityKind,
    /// Recorded entities edited on the server; the next apply restores
    /// them only if the manifest changes them too
    pub changed: Vec<String>,
    /// Recorded entities deleted on the server; the next apply forgets
    /// them and recreates the ones still declared
    pub vanished: Vec<String>,
    /// Entities on the server no run created; apply leaves them alone
    pub unmanaged: Vec<String>,
}

impl CollectionDrift {
    pub fn is_clean(&self) -> bool {
        self.changed.is_empty() && self.vanished.is_empty() && self.unmanaged.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    collections: Vec<CollectionPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    drift: Option<Vec<CollectionDrift>>,
}

/// Execute the plan command
pub fn execute(args: PlanArgs) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;
    let snapshot = state::load(&args.state)?;
    let policy = if args.strict {
        MatchPolicy::RejectAmbiguous
    } else {
        MatchPolicy::FirstWins
    };

    let plans = build_plan(&manifest, &snapshot, policy)?;
    let drift = if args.live {
        let config = Config::from_env()?;
        let client = ZabbixClient::connect(&config)?;
        Some(live_drift(&client, &snapshot)?)
    } else {
        None
    };

    if args.json {
        let output = PlanOutput {
            collections: plans,
            drift,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_plan(&plans);
        if let Some(drift) = &drift {
            print_drift(drift);
        }
    }
    Ok(())
}

const UNRESOLVED_PREFIX: &str = "host:";

/// Partition every collection of `manifest` against `snapshot`.
///
/// Templates addressed by host resolve through the aliases an earlier apply
/// recorded; unknown hosts plan against an empty state.
pub fn build_plan(
    manifest: &Manifest,
    snapshot: &StateSnapshot,
    policy: MatchPolicy,
) -> Result<Vec<CollectionPlan>> {
    let matcher = Matcher::new(policy);
    let collections = manifest.collections(|host| {
        Ok(snapshot
            .alias(host)
            .cloned()
            .unwrap_or_else(|| format!("{}{}", UNRESOLVED_PREFIX, host)))
    })?;

    let mut plans = Vec::new();
    let mut keep = Vec::new();
    for collection in collections {
        let old = snapshot.entities(&collection.parent, collection.kind);
        if old.is_empty() && collection.entities.is_empty() {
            continue;
        }
        let partition = matcher.partition(old, collection.entities)?;
        let parent_id = collection.parent.id().clone();

        plans.push(CollectionPlan {
            unresolved_host: parent_id.strip_prefix(UNRESOLVED_PREFIX).map(str::to_string),
            kind: collection.kind,
            create: partition.to_create.iter().map(|e| e.name.clone()).collect(),
            update: partition.changed_updates().map(|e| e.name.clone()).collect(),
            unchanged: partition.unchanged_count(),
            delete: partition.to_delete.iter().map(|e| e.name.clone()).collect(),
            parent_id,
        });
        keep.push((collection.parent, collection.kind));
    }

    for orphan in snapshot.orphaned(&keep) {
        plans.push(CollectionPlan {
            parent_id: orphan.parent.id().clone(),
            kind: orphan.kind,
            create: Vec::new(),
            update: Vec::new(),
            unchanged: 0,
            delete: orphan.entities.iter().map(|e| e.name.clone()).collect(),
            unresolved_host: None,
        });
    }

    Ok(plans)
}

/// Read every collection the state file records and compare it with the
/// recorded entities. Returns only collections with differences.
pub fn live_drift(
    client: &ZabbixClient,
    snapshot: &StateSnapshot,
) -> Result<Vec<CollectionDrift>> {
    let mut report = Vec::new();

    for collection in snapshot.collections.values() {
        let query = Query::all(collection.kind, collection.parent.clone());
        let live = client.fetch(&query)?;
        let drift = detect_drift(&collection.entities, &live);

        let entry = CollectionDrift {
            parent_id: collection.parent.id().clone(),
            kind: collection.kind,
            changed: drift
                .changed
                .iter()
                .map(|(recorded, _)| recorded.name.clone())
                .collect(),
            vanished: names(&drift.vanished),
            unmanaged: names(&drift.unmanaged),
        };
        if !entry.is_clean() {
            report.push(entry);
        }
    }
    Ok(report)
}

fn names(entities: &[Entity]) -> Vec<String> {
    entities.iter().map(|e| e.name.clone()).collect()
}

fn parent_label(kind: EntityKind, parent_id: &str) -> String {
    let owner = if kind.is_prototype() {
        "discovery rule"
    } else {
        "template"
    };
    format!("{} {}", owner, parent_id)
}

fn print_plan(plans: &[CollectionPlan]) {
    let mut totals = (0, 0, 0);

    for plan in plans.iter().filter(|p| !p.is_noop()) {
        let label = match &plan.unresolved_host {
            Some(host) => format!("template '{}' (not yet resolved)", host),
            None => parent_label(plan.kind, &plan.parent_id),
        };
        println!("{} {}:", label, plan.kind);
        for name in &plan.create {
            println!("  + {}", name);
        }
        for name in &plan.update {
            println!("  ~ {}", name);
        }
        for name in &plan.delete {
            println!("  - {}", name);
        }
        totals.0 += plan.create.len();
        totals.1 += plan.update.len();
        totals.2 += plan.delete.len();
    }

    if totals == (0, 0, 0) {
        println!("No changes. Zabbix matches the manifest.");
    } else {
        println!(
            "Plan: {} to create, {} to update, {} to delete.",
            totals.0, totals.1, totals.2
        );
        println!("Inherited entities are only checked during apply.");
    }
}

fn print_drift(drift: &[CollectionDrift]) {
    if drift.is_empty() {
        println!("No drift. The server matches the recorded state.");
        return;
    }

    for entry in drift {
        println!("drift on {} {}:", parent_label(entry.kind, &entry.parent_id), entry.kind);
        for name in &entry.changed {
            println!("  ~ {} (edited on the server)", name);
        }
        for name in &entry.vanished {
            println!("  ! {} (deleted on the server)", name);
        }
        for name in &entry.unmanaged {
            println!("  ? {} (not managed)", name);
        }
    }
}
