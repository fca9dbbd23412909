//! Result alias and a small logging combinator.

use crate::error::Error;

/// The standard Result type for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for results whose error is only worth a log line.
pub trait ResultExt<T> {
    /// Convert to an Option, logging the error at `warn` with the given context.
    fn ok_logged(self, context: &str) -> Option<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ok_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }
}
