//! Domain types shared across the mailvault crates.
//!
//! Local filesystem locations use `PathBuf`; remote object keys are
//! forward-slash `String`s relative to the store root and never touch
//! `std::path`. All types serialize via serde.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Content-derived hash identifying one message; the catalog's unique key
/// and the deduplication handle for uploads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Leading characters used as a folder-name suffix (6 by convention).
    pub fn short(&self) -> &str {
        let n = self.0.len().min(6);
        &self.0[..n]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One message as recorded into the catalog by the extraction side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub fingerprint: Fingerprint,
    /// Absolute path of the raw message file on local disk.
    pub source_path: PathBuf,
    pub sender: String,
    pub subject: String,
    /// Raw `Date:` header text, kept verbatim; parsed on use.
    pub message_date: String,
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
    #[serde(default)]
    pub spam: bool,
}

/// One catalog row: a recorded message plus its sync/rotation state.
///
/// `remote_path` is set only after a verified publish; it never points at a
/// half-uploaded bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub fingerprint: Fingerprint,
    pub source_path: PathBuf,
    pub sender: String,
    pub subject: String,
    pub message_date: String,
    /// Year derived from `message_date` once at record time.
    pub message_year: i32,
    pub attachments: Vec<PathBuf>,
    pub spam: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,
    /// Store-relative key of the published message object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl CatalogEntry {
    /// Best known content hash for this message: the verified upload hash
    /// when present, the fingerprint otherwise.
    pub fn best_hash(&self) -> &str {
        match self.local_hash.as_deref() {
            Some(h) if !h.is_empty() => h,
            _ => &self.fingerprint.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
