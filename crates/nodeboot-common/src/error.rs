//! Unified error types for the nodeboot workspace.
//!
//! Fatal reconciliation failures surface as one of these variants; tolerated
//! failures are logged at the call site and never reach this type.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum NodebootError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A mount, unmount or remount syscall failed.
    #[error("{operation} on {target} failed: {source}")]
    Mount {
        /// Short name of the operation, e.g. `bind mount`.
        operation: &'static str,
        /// Mount target the operation applied to.
        target: PathBuf,
        /// Underlying OS error; callers inspect the errno.
        source: std::io::Error,
    },

    /// An external command could not be spawned or exited unsuccessfully.
    #[error("command `{program}` failed: {message}")]
    Command {
        /// Program that was invoked.
        program: String,
        /// Description of the failure.
        message: String,
    },

    /// The host does not satisfy a hard requirement.
    #[error("validation failed: {message}")]
    Validation {
        /// Requirement that was not met.
        message: String,
    },

    /// Recorded state contradicts what was observed on this boot.
    #[error("inconsistent node state: {message}")]
    Inconsistent {
        /// Description of the contradiction.
        message: String,
    },

    /// A configuration file or command output could not be parsed.
    #[error("failed to parse {what}: {message}")]
    Parse {
        /// What was being parsed.
        what: String,
        /// Parser error message.
        message: String,
    },

    /// A retried step never succeeded.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Step that was retried.
        operation: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// Error from the last attempt.
        source: Box<NodebootError>,
    },
}

impl NodebootError {
    /// Builds an [`NodebootError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the raw errno of a failed mount operation.
    pub fn mount_errno(&self) -> Option<i32> {
        match self {
            Self::Mount { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NodebootError>;
