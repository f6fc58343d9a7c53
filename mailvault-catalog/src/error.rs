//! Error types for mailvault-catalog.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from catalog operations.
///
/// `Open` is the fatal one: if the database cannot be initialized, nothing
/// downstream can be trusted and the process must stop.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Could not open or initialize the database file.
    #[error("cannot open catalog at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Could not create the directory that should hold the database.
    #[error("cannot create catalog directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A query or statement failed after the catalog was opened.
    #[error("catalog query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// The connection mutex was poisoned by a panicking worker.
    #[error("catalog connection lock poisoned")]
    LockPoisoned,

    /// A stored attachment list could not be decoded.
    #[error("invalid attachment list for {fingerprint}: {source}")]
    BadAttachments {
        fingerprint: String,
        #[source]
        source: serde_json::Error,
    },
}
