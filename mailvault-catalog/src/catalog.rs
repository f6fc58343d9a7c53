//! The message catalog: SQLite-backed state of record for sync and rotation.
//!
//! # Contract
//!
//! - `record_message` is the extraction-side boundary: an idempotent upsert
//!   keyed by fingerprint. Re-recording an existing fingerprint is a no-op.
//! - The uploader moves rows `pending → synced` via `mark_synced`, which is
//!   the ONLY place `remote_path` is first set — and it must only be called
//!   after a verified publish.
//! - Rotation stamps `archived_at` per year; the auditor may re-point
//!   `remote_path` at a freshly repaired location via `update_remote_path`.
//! - Rows are never deleted.
//!
//! All reads and writes go through one `Connection` behind a mutex; the
//! handle is created in `open` and shared by `Arc<Catalog>`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use mailvault_core::dates;
use mailvault_core::types::{CatalogEntry, Fingerprint, NewMessage};

use crate::error::CatalogError;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL UNIQUE,
    source_path TEXT NOT NULL,
    sender TEXT NOT NULL DEFAULT '',
    subject TEXT NOT NULL DEFAULT '',
    message_date TEXT NOT NULL DEFAULT '',
    message_year INTEGER NOT NULL,
    attachments TEXT NOT NULL DEFAULT '[]',
    spam INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT,
    local_hash TEXT,
    remote_path TEXT,
    archived_at TEXT,
    recorded_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_messages_synced ON messages(synced_at);
CREATE INDEX IF NOT EXISTS idx_messages_year ON messages(message_year);
CREATE INDEX IF NOT EXISTS idx_messages_archived ON messages(archived_at);
";

const ENTRY_COLUMNS: &str = "fingerprint, source_path, sender, subject, message_date, \
     message_year, attachments, spam, synced_at, local_hash, remote_path, archived_at";

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Handle to the catalog database. Cheap to share via `Arc`.
#[derive(Debug)]
pub struct Catalog {
    conn: Mutex<Connection>,
}

/// Row counts for the status view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CatalogSummary {
    pub total: u64,
    pub pending: u64,
    pub synced: u64,
    pub archived: u64,
    pub spam: u64,
}

impl Catalog {
    /// Open (creating if needed) the catalog at `path`, apply pragmas and
    /// the schema. The parent directory is created if absent.
    pub fn open(path: &Path) -> Result<Catalog, CatalogError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| CatalogError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| CatalogError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        let catalog = Catalog { conn: Mutex::new(conn) };
        catalog.init(path)?;
        debug!("opened catalog at {}", path.display());
        Ok(catalog)
    }

    /// In-memory catalog for tests and dry experiments.
    pub fn open_in_memory() -> Result<Catalog, CatalogError> {
        let conn = Connection::open_in_memory().map_err(|e| CatalogError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        let catalog = Catalog { conn: Mutex::new(conn) };
        catalog.init(Path::new(":memory:"))?;
        Ok(catalog)
    }

    fn init(&self, path: &Path) -> Result<(), CatalogError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| CatalogError::Open { path: path.to_path_buf(), source: e })?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| CatalogError::Open { path: path.to_path_buf(), source: e })?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CatalogError> {
        self.conn.lock().map_err(|_| CatalogError::LockPoisoned)
    }

    // -----------------------------------------------------------------------
    // Recording (extraction-side boundary)
    // -----------------------------------------------------------------------

    /// Record one message. Returns `true` if the row is new, `false` if the
    /// fingerprint was already recorded (no-op).
    pub fn record_message(&self, msg: &NewMessage) -> Result<bool, CatalogError> {
        let attachments = serde_json::to_string(&msg.attachments).map_err(|e| {
            CatalogError::BadAttachments { fingerprint: msg.fingerprint.0.clone(), source: e }
        })?;
        let year = dates::year_of(&msg.message_date);
        let changed = self.conn()?.execute(
            "INSERT OR IGNORE INTO messages
                 (fingerprint, source_path, sender, subject, message_date,
                  message_year, attachments, spam)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                msg.fingerprint.0,
                msg.source_path.to_string_lossy(),
                msg.sender,
                msg.subject,
                msg.message_date,
                year,
                attachments,
                msg.spam as i64,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn is_recorded(&self, fingerprint: &Fingerprint) -> Result<bool, CatalogError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM messages WHERE fingerprint = ?1",
            params![fingerprint.0],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // -----------------------------------------------------------------------
    // Sync-state queries and transitions
    // -----------------------------------------------------------------------

    /// Rows awaiting upload: never synced, not spam.
    pub fn fetch_pending_sync(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.fetch_where("synced_at IS NULL AND spam = 0")
    }

    /// Rows the uploader has completed, in recording order.
    pub fn fetch_synced(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.fetch_where("synced_at IS NOT NULL")
    }

    /// Mark a row synced after a verified publish.
    pub fn mark_synced(
        &self,
        fingerprint: &Fingerprint,
        local_hash: &str,
        remote_path: &str,
    ) -> Result<(), CatalogError> {
        self.conn()?.execute(
            "UPDATE messages
                SET synced_at = ?2, local_hash = ?3, remote_path = ?4
              WHERE fingerprint = ?1",
            params![fingerprint.0, Utc::now().to_rfc3339(), local_hash, remote_path],
        )?;
        Ok(())
    }

    /// Re-point a row at a repaired remote location. Leaves sync state alone.
    pub fn update_remote_path(
        &self,
        fingerprint: &Fingerprint,
        new_path: &str,
    ) -> Result<(), CatalogError> {
        self.conn()?.execute(
            "UPDATE messages SET remote_path = ?2 WHERE fingerprint = ?1",
            params![fingerprint.0, new_path],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rotation queries and transitions
    // -----------------------------------------------------------------------

    /// Distinct years with synced rows at or before `year`, ascending.
    pub fn candidate_years_up_to(&self, year: i32) -> Result<Vec<i32>, CatalogError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT message_year FROM messages
              WHERE synced_at IS NOT NULL AND message_year <= ?1
              ORDER BY message_year",
        )?;
        let years = stmt
            .query_map(params![year], |row| row.get::<_, i32>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(years)
    }

    /// Remote paths of synced-but-not-archived rows for one year.
    pub fn unarchived_paths_for_year(&self, year: i32) -> Result<Vec<String>, CatalogError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT remote_path FROM messages
              WHERE message_year = ?1
                AND synced_at IS NOT NULL
                AND archived_at IS NULL
                AND remote_path IS NOT NULL
              ORDER BY remote_path",
        )?;
        let paths = stmt
            .query_map(params![year], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    }

    /// Stamp every synced row of `year` as archived. Returns rows touched.
    pub fn mark_archived_for_year(&self, year: i32) -> Result<usize, CatalogError> {
        let changed = self.conn()?.execute(
            "UPDATE messages
                SET archived_at = ?2
              WHERE message_year = ?1 AND synced_at IS NOT NULL AND archived_at IS NULL",
            params![year, Utc::now().to_rfc3339()],
        )?;
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Status view
    // -----------------------------------------------------------------------

    pub fn summary(&self) -> Result<CatalogSummary, CatalogError> {
        self.conn()?.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN synced_at IS NULL AND spam = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN synced_at IS NOT NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN archived_at IS NOT NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(spam), 0)
               FROM messages",
            [],
            |row| {
                Ok(CatalogSummary {
                    total: row.get::<_, i64>(0)? as u64,
                    pending: row.get::<_, i64>(1)? as u64,
                    synced: row.get::<_, i64>(2)? as u64,
                    archived: row.get::<_, i64>(3)? as u64,
                    spam: row.get::<_, i64>(4)? as u64,
                })
            },
        )
        .map_err(CatalogError::from)
    }

    // -----------------------------------------------------------------------
    // Row mapping
    // -----------------------------------------------------------------------

    fn fetch_where(&self, predicate: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM messages WHERE {predicate} ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map([], |row| {
                Ok(RawRow {
                    fingerprint: row.get(0)?,
                    source_path: row.get(1)?,
                    sender: row.get(2)?,
                    subject: row.get(3)?,
                    message_date: row.get(4)?,
                    message_year: row.get(5)?,
                    attachments: row.get(6)?,
                    spam: row.get::<_, i64>(7)? != 0,
                    synced_at: row.get(8)?,
                    local_hash: row.get(9)?,
                    remote_path: row.get(10)?,
                    archived_at: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRow::into_entry).collect()
    }
}

/// Plain column values; decoded into `CatalogEntry` outside the rusqlite
/// closure so JSON errors surface as `CatalogError`, not `rusqlite::Error`.
struct RawRow {
    fingerprint: String,
    source_path: String,
    sender: String,
    subject: String,
    message_date: String,
    message_year: i32,
    attachments: String,
    spam: bool,
    synced_at: Option<String>,
    local_hash: Option<String>,
    remote_path: Option<String>,
    archived_at: Option<String>,
}

impl RawRow {
    fn into_entry(self) -> Result<CatalogEntry, CatalogError> {
        let attachments: Vec<PathBuf> =
            serde_json::from_str(&self.attachments).map_err(|e| CatalogError::BadAttachments {
                fingerprint: self.fingerprint.clone(),
                source: e,
            })?;
        Ok(CatalogEntry {
            fingerprint: Fingerprint::from(self.fingerprint),
            source_path: PathBuf::from(self.source_path),
            sender: self.sender,
            subject: self.subject,
            message_date: self.message_date,
            message_year: self.message_year,
            attachments,
            spam: self.spam,
            synced_at: parse_ts(self.synced_at),
            local_hash: self.local_hash,
            remote_path: self.remote_path,
            archived_at: parse_ts(self.archived_at),
        })
    }
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
