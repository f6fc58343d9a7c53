//! Error types for mailvault-remote.

use std::path::PathBuf;

use thiserror::Error;

/// Transport failures. Callers treat these as retryable or skippable;
/// nothing here aborts a whole run on its own.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The subprocess could not be started at all.
    #[error("cannot start '{cmd}': {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    /// The subprocess ran and exited non-zero (beyond the codes that mean
    /// "not found").
    #[error("command failed (exit {code}): {cmd}: {stderr}")]
    CommandFailed { cmd: String, code: i32, stderr: String },

    /// The subprocess was killed by a signal.
    #[error("command interrupted: {cmd}")]
    Interrupted { cmd: String },

    /// Unusable output (bad listing JSON, bad filter glob).
    #[error("cannot parse {what}: {detail}")]
    Parse { what: String, detail: String },

    /// Local filesystem failure while moving data in or out of the store.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> RemoteError {
        RemoteError::Io { path: path.into(), source }
    }
}
