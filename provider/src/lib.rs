//! # zabbix-sync
//!
//! Keeps the items and triggers of Zabbix templates, and the prototypes of
//! low-level discovery rules, in line with a JSON manifest.
//!
//! The reconciliation itself lives in `zabbix-sync-engine`; this crate adds
//! the JSON-RPC client, the manifest and state files, and the CLI commands.

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod manifest;
pub mod state;

pub use client::ZabbixClient;
pub use config::{Config, ConfigError, Credentials};
pub use error::{ClientError, ProviderError, Result};
pub use manifest::{Collection, Manifest};
