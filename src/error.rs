//! Error types for the recovery sync tool.
//!
//! [`StoreError`] covers everything the store gateway can report, and
//! [`ReconcileError`] is the single terminal failure of a run. "Not found" is
//! never an error at either level; lookups return `Ok(None)` instead.

use crate::classifier::ListKind;
use std::fmt;
use thiserror::Error;

/// Result type for store gateway operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for run-level operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Failures reported by a store gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A logical connection could not be opened
    #[error("Failed to connect '{name}': {message}")]
    Connect { name: String, message: String },

    /// An operation named a connection that was never configured
    #[error("Unknown connection '{0}'")]
    UnknownConnection(String),

    /// The storage backend rejected or failed an operation
    #[error("Store operation '{operation}' failed: {message}")]
    Backend { operation: String, message: String },

    /// A stored or supplied document could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An insert collided with an existing identity
    #[error("Duplicate key '{0}'")]
    DuplicateKey(String),

    /// A document or filter had an unusable shape
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

impl StoreError {
    pub fn backend(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

impl From<sled::Error> for StoreError {
    fn from(error: sled::Error) -> Self {
        StoreError::backend("sled", error)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

/// Pipeline stage a run failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Config,
    Connect,
    Classify,
    Delete,
    Insert,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Connect => "connect",
            Self::Classify => "classify",
            Self::Delete => "delete",
            Self::Insert => "insert",
        };
        f.write_str(name)
    }
}

/// Terminal failure of a reconciliation run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Opening a store connection failed; nothing was read
    #[error("Connect error: {0}")]
    Connect(#[source] StoreError),

    /// Reading the queue page failed; nothing was mutated
    #[error("Classify error: queue read failed: {0}")]
    Classify(#[source] StoreError),

    /// The existence check for a record failed
    #[error("Lookup error on {list} list at index {index} (id '{id}'): {source}")]
    Lookup {
        list: ListKind,
        index: usize,
        id: String,
        #[source]
        source: StoreError,
    },

    /// The insert or delete itself failed after a successful lookup
    #[error("Mutation error on {list} list at index {index} (id '{id}'): {source}")]
    Mutation {
        list: ListKind,
        index: usize,
        id: String,
        #[source]
        source: StoreError,
    },

    /// A step was requested on a list that already failed
    #[error("{list} list halted at index {index} after an earlier failure")]
    Halted { list: ListKind, index: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    /// Stage of the pipeline that produced this error.
    pub fn stage(&self) -> RunStage {
        match self {
            Self::Config(_) | Self::Io(_) => RunStage::Config,
            Self::Connect(_) => RunStage::Connect,
            Self::Classify(_) => RunStage::Classify,
            Self::Lookup { list, .. } | Self::Mutation { list, .. } | Self::Halted { list, .. } => {
                list.stage()
            }
        }
    }

    /// Frozen cursor of the failing list, which is also the resume point.
    pub fn cursor(&self) -> Option<usize> {
        match self {
            Self::Lookup { index, .. }
            | Self::Mutation { index, .. }
            | Self::Halted { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
