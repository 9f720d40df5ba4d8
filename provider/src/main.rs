//! zabbix-sync - declarative management of Zabbix template entities.
//!
//! Reads a manifest of template items and triggers and discovery rule
//! prototypes, and reconciles the server against it using the state file
//! recorded by the previous run.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zabbix_sync::commands::{apply, check, plan};

/// zabbix-sync - Zabbix template reconciliation
#[derive(Parser)]
#[command(name = "zabbix-sync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the changes a manifest implies, offline
    Plan(plan::PlanArgs),

    /// Reconcile the server with a manifest
    Apply(apply::ApplyArgs),

    /// Check connectivity and credentials
    Check(check::CheckArgs),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zabbix_sync=info,zabbix_sync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Plan(args) => plan::execute(args)?,
        Commands::Apply(args) => apply::execute(args)?,
        Commands::Check(args) => check::execute(args)?,
    }

    Ok(())
}
