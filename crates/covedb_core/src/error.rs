//! Error types for covedb core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in covedb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed option value or argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the offending argument.
        message: String,
    },

    /// Structurally conflicting option combination or operation.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the conflict.
        message: String,
    },

    /// On-disk schema version or structure does not match the configuration
    /// and no sufficient migration policy was supplied.
    #[error("migration required: {message}")]
    MigrationNeeded {
        /// Description of the mismatch.
        message: String,
    },

    /// Underlying file cannot be created, opened, read, or copied.
    #[error("file access error at {}: {message}", path.display())]
    FileAccess {
        /// The path that could not be accessed.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Store file content is corrupted or has an unsupported format.
    #[error("invalid store file: {message}")]
    InvalidStore {
        /// Description of the format issue.
        message: String,
    },

    /// A repeated acquire for an already-open identity supplied divergent
    /// identity-relevant options.
    #[error("incompatible configuration ({field}): {message}")]
    IncompatibleConfiguration {
        /// The conflicting configuration field.
        field: &'static str,
        /// Description of the divergence.
        message: String,
    },

    /// Database handle has already been closed.
    #[error("database instance is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a migration required error.
    pub fn migration_needed(message: impl Into<String>) -> Self {
        Self::MigrationNeeded {
            message: message.into(),
        }
    }

    /// Creates a file access error for a path.
    pub fn file_access(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::FileAccess {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid store file error.
    pub fn invalid_store(message: impl Into<String>) -> Self {
        Self::InvalidStore {
            message: message.into(),
        }
    }

    /// Creates an incompatible configuration error.
    pub fn incompatible(field: &'static str, message: impl Into<String>) -> Self {
        Self::IncompatibleConfiguration {
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_field() {
        let err = CoreError::incompatible("schema_version", "cached 1, requested 2");
        let text = err.to_string();
        assert!(text.contains("schema_version"));
        assert!(text.contains("cached 1"));
    }

    #[test]
    fn file_access_shows_path() {
        let err = CoreError::file_access("/tmp/missing.cove", "no such file");
        assert!(err.to_string().contains("/tmp/missing.cove"));
    }
}
