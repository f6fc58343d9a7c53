//! Mailvault catalog — the durable local record of every message seen,
//! synced, and archived.
//!
//! One SQLite database, one explicit connection shared behind a mutex and
//! passed by `Arc` to whoever needs it. No thread-local or lazily created
//! handles: the connection is opened once at startup and its failure is a
//! fatal startup error.
//!
//! Public API surface:
//! - [`catalog`] — [`Catalog`], [`CatalogSummary`]
//! - [`error`] — [`CatalogError`]

pub mod catalog;
pub mod error;

pub use catalog::{Catalog, CatalogSummary};
pub use error::CatalogError;
