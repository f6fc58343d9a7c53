//! Error types for mailvault-engine.

use thiserror::Error;

/// Errors surfaced by pool construction and task submission.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool (or the whole hub) is already interrupted; no new work is
    /// admitted.
    #[error("pool '{pool}' is interrupted")]
    Interrupted { pool: String },

    /// The pool has been shut down; its job channel is closed.
    #[error("pool '{pool}' is shut down")]
    ShutDown { pool: String },

    /// The OS refused to spawn a worker thread.
    #[error("cannot spawn worker thread for pool '{pool}': {source}")]
    Spawn {
        pool: String,
        #[source]
        source: std::io::Error,
    },
}
