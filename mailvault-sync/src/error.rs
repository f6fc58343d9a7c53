//! Error types for mailvault-sync.

use std::path::PathBuf;

use thiserror::Error;

use mailvault_catalog::CatalogError;
use mailvault_engine::PoolError;
use mailvault_remote::RemoteError;

/// All errors that can arise from sync stages.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A transport failure from the remote store.
    #[error("transport error: {0}")]
    Transport(#[from] RemoteError),

    /// An error from the local catalog.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// A worker-pool error (submission refused, pool gone).
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// A published object never verified against its expected hash.
    #[error("verification failed for {remote_path} after {attempts} attempt(s)")]
    Verification { remote_path: String, attempts: u32 },

    /// The manifest CAS loop lost every retry; a conflict copy was written.
    #[error("manifest conflict after {attempts} attempt(s); conflict copy uploaded")]
    ManifestConflict { attempts: u32 },

    /// The run was interrupted; state has been persisted.
    #[error("interrupted")]
    Interrupted,

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (queue snapshot, metadata).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
