//! Configuration-time error types.
//!
//! Everything in here is fatal at startup: the watcher refuses to run with
//! a configuration it cannot fully validate.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("YAML parse error in '{path}': {reason}")]
    YamlParseFailed { path: PathBuf, reason: String },

    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    #[error("invalid template '{path}': {reason}")]
    TemplateInvalid { path: PathBuf, reason: String },
}

impl Error {
    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a YAML parse error.
    pub fn yaml_parse_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::YamlParseFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn config_invalid(reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            reason: reason.into(),
        }
    }

    /// Create an invalid template error.
    pub fn template_invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::TemplateInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
