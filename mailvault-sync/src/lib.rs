//! Mailvault sync: the pipeline stages and the remote-consistency
//! machinery behind them.
//!
//! ```text
//! fetch ── external command refreshing the local mail store
//!   │
//! backup ─ docset staging → verified publish → catalog + manifest queue
//!   │
//! rotate ─ old years folded into one tar.zst archive per year
//!   │
//! audit ── catalog vs. store reconciliation, optional repair
//! ```
//!
//! Durability rules shared by all stages:
//! - a catalog row only advances after the published object verified
//! - every published object is queued for the manifest, and the queue is
//!   snapshotted to disk on each addition
//! - the remote manifest is updated through a CAS loop that never
//!   overwrites a concurrent writer's work
//!
//! API pattern: `main` builds one [`StageContext`] and calls [`run_plan`];
//! everything else is plumbing the stages share.

pub mod audit;
pub mod docset;
pub mod error;
mod fsutil;
pub mod hash;
pub mod manifest;
pub mod pipeline;
pub mod rotation;
pub mod transfer;
pub mod uploader;

pub use audit::{run_audit, AuditOutcome, AuditReport};
pub use docset::{folder_name, sanitize, DocsetBundle, DocsetMetadata};
pub use error::SyncError;
pub use manifest::{encode_manifest, parse_manifest, ManifestSync};
pub use pipeline::{run_plan, Plan, StageContext};
pub use rotation::{run_rotate, RotateReport};
pub use transfer::{publish, publish_verified};
pub use uploader::{run_backup, UploadReport};
