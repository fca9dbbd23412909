//! Error types for the reconciler crate.

use std::fmt;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A governance file is missing, malformed or references an unknown owner group.
    GovernanceLoad { path: String, reason: String },
    /// A platform call failed.
    Platform { operation: String, reason: String },
    /// The worker pool refused a task.
    DispatchRejected { repo: String, reason: String },
    /// Repository creation failed; nothing was committed.
    CreationFailed { repo: String, reason: String },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GovernanceLoad { path, reason } => {
                write!(f, "failed to load governance file '{path}': {reason}")
            }
            Self::Platform { operation, reason } => {
                write!(f, "platform call '{operation}' failed: {reason}")
            }
            Self::DispatchRejected { repo, reason } => {
                write!(f, "task for '{repo}' rejected: {reason}")
            }
            Self::CreationFailed { repo, reason } => {
                write!(f, "failed to create repository '{repo}': {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create a governance load error.
    pub fn governance_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GovernanceLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a platform error.
    pub fn platform(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Platform {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a dispatch rejected error.
    pub fn dispatch_rejected(repo: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DispatchRejected {
            repo: repo.into(),
            reason: reason.into(),
        }
    }

    /// Create a creation failed error.
    pub fn creation_failed(repo: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::CreationFailed {
            repo: repo.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
