//! Configuration management for the CLI.

use std::env;
use std::time::Duration;
use zabbix_sync_engine::MatchPolicy;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How the client authenticates against the API.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Pre-issued API token, used as is
    Token(String),
    /// `user.login` with a name and password
    Login { user: String, password: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(***)"),
            Credentials::Login { user, .. } => f
                .debug_struct("Login")
                .field("user", user)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server base URL, e.g. `https://zabbix.example.com`
    pub url: String,
    pub credentials: Credentials,
    /// Timeout applied to every HTTP call
    pub timeout: Duration,
    /// Refuse ambiguous matches instead of taking the first candidate
    pub strict_matching: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let url = var("ZABBIX_URL").ok_or(ConfigError::MissingUrl)?;

        let credentials = match var("ZABBIX_API_TOKEN") {
            Some(token) => Credentials::Token(token),
            None => match (var("ZABBIX_USER"), var("ZABBIX_PASSWORD")) {
                (Some(user), Some(password)) => Credentials::Login { user, password },
                _ => return Err(ConfigError::MissingCredentials),
            },
        };

        let timeout = match var("ZABBIX_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidTimeout(raw))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let strict_matching = match var("ZABBIX_STRICT_MATCHING") {
            Some(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFlag {
                name: "ZABBIX_STRICT_MATCHING",
                value: raw,
            })?,
            None => false,
        };

        Ok(Self {
            url,
            credentials,
            timeout: Duration::from_secs(timeout),
            strict_matching,
        })
    }

    pub fn match_policy(&self) -> MatchPolicy {
        if self.strict_matching {
            MatchPolicy::RejectAmbiguous
        } else {
            MatchPolicy::FirstWins
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ZABBIX_URL environment variable is required")]
    MissingUrl,

    #[error("either ZABBIX_API_TOKEN or both ZABBIX_USER and ZABBIX_PASSWORD are required")]
    MissingCredentials,

    #[error("invalid ZABBIX_TIMEOUT_SECS value: {0}")]
    InvalidTimeout(String),

    #[error("invalid {name} value: {value}")]
    InvalidFlag { name: &'static str, value: String },
}
