//! Unified error handling for the CLI.

use crate::config::ConfigError;
use zabbix_sync_engine::{ReconcileFailure, RemoteError};

/// Errors raised while talking to the JSON-RPC endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} failed: [{code}] {message}: {data}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
        data: String,
    },

    #[error("could not decode {method} response: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} requires an authenticated session")]
    NotLoggedIn(String),

    #[error("unexpected {method} response: {detail}")]
    UnexpectedResponse { method: String, detail: String },

    #[error("no template with host name '{0}'")]
    TemplateNotFound(String),
}

impl From<ClientError> for RemoteError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Rpc {
                code,
                message,
                data,
                ..
            } => RemoteError::new(message).with_code(code).with_data(data),
            other => RemoteError::new(other.to_string()),
        }
    }
}

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] zabbix_sync_engine::Error),

    #[error("Reconciliation failed: {0}")]
    Reconcile(Box<ReconcileFailure>),

    #[error("Zabbix API error: {0}")]
    Client(#[from] ClientError),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ReconcileFailure> for ProviderError {
    fn from(failure: ReconcileFailure) -> Self {
        ProviderError::Reconcile(Box::new(failure))
    }
}

impl ProviderError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        ProviderError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Result type alias for commands.
pub type Result<T> = std::result::Result<T, ProviderError>;
