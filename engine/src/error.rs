//! Error types for the reconciliation engine.

use crate::{EntityKind, ParentId, RemoteId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A failure reported by the remote collection, already stripped of
/// transport-specific types so engine errors stay `Clone + PartialEq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// JSON-RPC error code, absent for transport or decode failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[{}] ", code)?;
        }
        f.write_str(&self.message)?;
        if let Some(data) = &self.data {
            write!(f, ": {}", data)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

/// The mutating step of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Create => "create",
            Step::Update => "update",
            Step::Delete => "delete",
        })
    }
}

/// Which identity field produced an ambiguous match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Name,
    Key,
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchField::Name => "name",
            MatchField::Key => "key",
        })
    }
}

/// All possible errors from the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Remote failures
    #[error("lookup of {kind} under parent {parent_id} failed: {source}")]
    Lookup {
        kind: EntityKind,
        parent_id: ParentId,
        #[source]
        source: RemoteError,
    },

    #[error(
        "{step} of {kind} under parent {parent_id} failed for [{}]: {source}",
        .batch.join(", ")
    )]
    Mutation {
        kind: EntityKind,
        parent_id: ParentId,
        step: Step,
        /// Remote ids for update/delete, names for create
        batch: Vec<String>,
        #[source]
        source: RemoteError,
    },

    // Matching
    #[error(
        "ambiguous {field} match for {kind} '{value}': candidates [{}]",
        .candidates.join(", ")
    )]
    AmbiguousMatch {
        kind: EntityKind,
        field: MatchField,
        value: String,
        candidates: Vec<RemoteId>,
    },

    #[error("invalid reconcile request: {0}")]
    InvalidRequest(String),

    // State snapshots
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("snapshot format version mismatch: expected {expected}, got {actual}")]
    SnapshotVersionMismatch { expected: u32, actual: u32 },
}

impl Error {
    /// The mutating step that failed, if any.
    pub fn step(&self) -> Option<Step> {
        match self {
            Error::Mutation { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
