//! Verify connectivity and credentials.

use crate::client::ZabbixClient;
use crate::config::{Config, Credentials};
use crate::error::Result;
use clap::Args;

/// Check that the server is reachable and the credentials work
#[derive(Args, Debug)]
pub struct CheckArgs {}

/// Execute the check command
pub fn execute(_args: CheckArgs) -> Result<()> {
    let config = Config::from_env()?;

    let anonymous = ZabbixClient::new(&config.url, config.timeout)?;
    let version = anonymous.api_version()?;
    println!("Zabbix API {} at {}", version, anonymous.endpoint());

    let client = ZabbixClient::connect(&config)?;
    match &config.credentials {
        Credentials::Login { user, .. } => println!("Logged in as {}", user),
        Credentials::Token(_) => println!("Using API token"),
    }
    tracing::info!(
        endpoint = client.endpoint(),
        authenticated = client.is_authenticated(),
        %version,
        "check complete"
    );
    Ok(())
}
