//! Remote object-store access for mailvault.
//!
//! All stages talk to the backup target through the [`RemoteStore`] trait,
//! with paths relative to a store-owned root. Two backends:
//!
//! - [`RcloneStore`] — spawns the configured `rclone` binary per call
//!   (`copyto`, `moveto`, `cat`, `hashsum`, `lsjson`, `lsf`, `deletefile`,
//!   `copy`). This is the production backend.
//! - [`DirStore`] — a plain directory on the local filesystem. Same
//!   contract, no subprocesses; what the tests run against.
//!
//! Absence is a normal negative (`false` / `None` / empty list), never an
//! error. Errors mean the transport itself failed.
//!
//! API pattern: construct via [`open`] (backend auto-detected from the
//! configured target) or a concrete constructor, then call trait methods.

pub mod dir_store;
pub mod error;
pub mod exec;
pub mod rclone;
pub mod store;

pub use dir_store::DirStore;
pub use error::RemoteError;
pub use rclone::RcloneStore;
pub use store::{open, RemoteStore};
