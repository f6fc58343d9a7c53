//! The remote manifest and its crash-safe update protocol.
//!
//! The manifest is one CSV object at the store root mapping every published
//! object to its sha256. Several processes may update it concurrently, so
//! writes go through an optimistic CAS loop keyed on the manifest's own
//! content hash; losers retry against the fresh snapshot and, past the
//! retry bound, degrade to a conflict copy instead of clobbering the
//! canonical object.
//!
//! # Local state (all under the state dir)
//!
//! ```text
//! manifest.csv          local mirror of the last merge
//! manifest.queue.json   snapshot of not-yet-flushed entries
//! manifest.uploading    in-progress marker (one RFC 3339 line)
//! ```
//!
//! The queue snapshot is rewritten on every `queue_entry`, so entries
//! survive a hard kill at any point; `recover` folds them back in at the
//! next startup.
//!
//! # File format
//!
//! One `<sha256-hex>,<path>\n` line per entry, sorted by path. The parser
//! skips blank lines and lines without a comma and never errors; a damaged
//! manifest degrades to fewer entries, not a crash.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mailvault_core::config::{ManifestSettings, StateLayout};
use mailvault_remote::RemoteStore;

use crate::error::{io_err, SyncError};
use crate::fsutil;
use crate::hash;

// ---------------------------------------------------------------------------
// 1. Format
// ---------------------------------------------------------------------------

/// Parse manifest CSV text into `path → sha256`. Lenient by contract.
pub fn parse_manifest(text: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        let Some((sha, path)) = line.split_once(',') else { continue };
        let (sha, path) = (sha.trim(), path.trim());
        if sha.is_empty() || path.is_empty() {
            continue;
        }
        entries.insert(path.to_owned(), sha.to_owned());
    }
    entries
}

/// Render `path → sha256` as manifest CSV, sorted by path.
pub fn encode_manifest(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (path, sha) in entries {
        out.push_str(sha);
        out.push(',');
        out.push_str(path);
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// 2. Synchronizer
// ---------------------------------------------------------------------------

pub struct ManifestSync {
    remote_name: String,
    local_path: PathBuf,
    queue_path: PathBuf,
    marker_path: PathBuf,
    max_retries: u32,
    queue: Mutex<BTreeMap<String, String>>,
}

impl ManifestSync {
    pub fn new(layout: &StateLayout, settings: &ManifestSettings) -> ManifestSync {
        ManifestSync {
            remote_name: settings.remote_name.clone(),
            local_path: layout.manifest.clone(),
            queue_path: layout.queue.clone(),
            marker_path: layout.marker.clone(),
            max_retries: settings.max_retries.max(1),
            queue: Mutex::new(BTreeMap::new()),
        }
    }

    // -----------------------------------------------------------------------
    // 2.1 Queue
    // -----------------------------------------------------------------------

    /// Record a published object. The whole queue is snapshotted to disk
    /// before returning so the entry survives a hard kill; a failed
    /// snapshot is logged and the entry stays queued in memory.
    pub fn queue_entry(&self, remote_path: &str, sha256: &str) {
        let queue = &mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.insert(remote_path.to_owned(), sha256.to_owned());
        self.snapshot_locked(queue);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Queue depth as persisted on disk, for status display in a process
    /// that has not loaded the queue.
    pub fn pending_on_disk(&self) -> usize {
        let Ok(bytes) = fs::read(&self.queue_path) else { return 0 };
        serde_json::from_slice::<BTreeMap<String, String>>(&bytes)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Snapshot the queue if non-empty. Called at stage boundaries and on
    /// interrupt, before unwinding.
    pub fn persist_queue(&self) {
        let queue = &*self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.is_empty() {
            return;
        }
        match fsutil::write_json_atomic(&self.queue_path, queue) {
            Ok(()) => info!("manifest queue saved ({} entries)", queue.len()),
            Err(e) => warn!("failed to persist manifest queue: {e}"),
        }
    }

    fn snapshot_locked(&self, queue: &BTreeMap<String, String>) {
        match fsutil::write_json_atomic(&self.queue_path, queue) {
            Ok(()) => debug!("persisted manifest queue ({} entries)", queue.len()),
            Err(e) => warn!("failed to persist manifest queue: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // 2.2 Recovery
    // -----------------------------------------------------------------------

    /// Startup path. If a previous run died mid-upload (marker present),
    /// finish its resync; then reload any queue snapshot left on disk.
    /// A manifest conflict during the catch-up resync is logged and
    /// tolerated; transport failures propagate.
    pub fn recover(&self, store: &dyn RemoteStore) -> Result<(), SyncError> {
        if self.marker_path.exists() {
            warn!("detected unfinished manifest upload from a previous run");
            let _ = fs::remove_file(&self.marker_path);
            match self.resync(store, &BTreeMap::new()) {
                Ok(()) => {}
                Err(SyncError::ManifestConflict { attempts }) => {
                    error!("recovery resync hit a manifest conflict after {attempts} attempt(s)");
                }
                Err(e) => return Err(e),
            }
        }
        self.restore_queue();
        Ok(())
    }

    fn restore_queue(&self) {
        if !self.queue_path.exists() {
            return;
        }
        let parsed = fs::read(&self.queue_path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                serde_json::from_slice::<BTreeMap<String, String>>(&bytes)
                    .map_err(|e| e.to_string())
            });
        match parsed {
            Ok(saved) => {
                let queue = &mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                queue.extend(saved);
                info!("restored {} manifest entries from {}", queue.len(), self.queue_path.display());
                let _ = fs::remove_file(&self.queue_path);
            }
            Err(e) => warn!("failed to restore manifest queue: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // 2.3 Flush
    // -----------------------------------------------------------------------

    /// Snapshot-and-clear the queue, then resync with the snapshot merged
    /// in. On any resync error the snapshot is folded back into the queue
    /// and re-persisted, so no entry is ever lost; entries queued while the
    /// flush ran win over the folded-back copies.
    pub fn flush_if_needed(&self, store: &dyn RemoteStore) -> Result<(), SyncError> {
        let snapshot = {
            let queue = &mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.is_empty() {
                info!("no new manifest entries to upload");
                return Ok(());
            }
            let snapshot = std::mem::take(queue);
            let _ = fs::remove_file(&self.queue_path);
            snapshot
        };

        match self.resync(store, &snapshot) {
            Ok(()) => Ok(()),
            Err(e) => {
                {
                    let queue = &mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                    for (path, sha) in snapshot {
                        queue.entry(path).or_insert(sha);
                    }
                }
                self.persist_queue();
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // 2.4 CAS resync
    // -----------------------------------------------------------------------

    /// Merge remote ∪ local-mirror ∪ `extra` (later wins) and swap the
    /// merge onto the canonical remote name, retrying while other writers
    /// race us. The in-progress marker brackets the whole operation.
    pub fn resync(
        &self,
        store: &dyn RemoteStore,
        extra: &BTreeMap<String, String>,
    ) -> Result<(), SyncError> {
        if let Some(parent) = self.marker_path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        fs::write(&self.marker_path, Utc::now().to_rfc3339())
            .map_err(|e| io_err(&self.marker_path, e))?;
        self.cleanup_remote_temps(store);

        let outcome = self.resync_attempts(store, extra);
        if let Err(e) = fs::remove_file(&self.marker_path) {
            debug!("could not remove in-progress marker: {e}");
        }
        outcome
    }

    fn resync_attempts(
        &self,
        store: &dyn RemoteStore,
        extra: &BTreeMap<String, String>,
    ) -> Result<(), SyncError> {
        let (remote_entries, mut remote_hash) = self.download_remote(store)?;
        let local_entries = self.load_local();
        let mut merged = merge(&remote_entries, &local_entries, extra);
        self.write_local(&merged)?;

        for attempt in 1..=self.max_retries {
            let temp_name = format!("{}.{}.tmp", self.remote_name, Uuid::new_v4().simple());
            store.copy_to(&self.local_path, &temp_name)?;

            // the CAS: only rename into place if nobody moved the base
            let (current_entries, current_hash) = self.download_remote(store)?;
            if current_hash == remote_hash {
                store.move_to(&temp_name, &self.remote_name)?;
                info!("remote manifest updated atomically ({} entries)", merged.len());
                return Ok(());
            }

            warn!(
                "remote manifest changed during upload, retrying ({attempt}/{})",
                self.max_retries
            );
            let _ = store.delete(&temp_name);
            remote_hash = current_hash;
            merged = merge(&current_entries, &local_entries, extra);
            self.write_local(&merged)?;
        }

        let conflict_name = format!("manifest.conflict.{}.csv", Uuid::new_v4().simple());
        match store.copy_to(&self.local_path, &conflict_name) {
            Ok(()) => error!(
                "failed to update remote manifest after {} attempt(s); wrote conflict copy {conflict_name}",
                self.max_retries
            ),
            Err(e) => error!("failed to upload manifest conflict copy {conflict_name}: {e}"),
        }
        Err(SyncError::ManifestConflict { attempts: self.max_retries })
    }

    /// Current canonical manifest and the hash of its raw bytes; an absent
    /// manifest is the empty baseline.
    fn download_remote(
        &self,
        store: &dyn RemoteStore,
    ) -> Result<(BTreeMap<String, String>, String), SyncError> {
        match store.cat(&self.remote_name)? {
            Some(bytes) => {
                let digest = hash::sha256_hex(&bytes);
                let entries = parse_manifest(&String::from_utf8_lossy(&bytes));
                Ok((entries, digest))
            }
            None => Ok((BTreeMap::new(), String::new())),
        }
    }

    fn load_local(&self) -> BTreeMap<String, String> {
        match fs::read_to_string(&self.local_path) {
            Ok(text) => parse_manifest(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("cannot read local manifest mirror: {e}");
                BTreeMap::new()
            }
        }
    }

    fn write_local(&self, entries: &BTreeMap<String, String>) -> Result<(), SyncError> {
        fsutil::atomic_write(&self.local_path, encode_manifest(entries).as_bytes())
    }

    /// Stray temps from dead runs are garbage on the remote; sweep them
    /// best-effort before starting our own attempt.
    fn cleanup_remote_temps(&self, store: &dyn RemoteStore) {
        let pattern = format!("{}.*.tmp", self.remote_name);
        match store.list(&pattern) {
            Ok(temps) => {
                for temp in temps {
                    if store.delete(&temp).is_ok() {
                        debug!("cleaned up old temp manifest: {temp}");
                    }
                }
            }
            Err(e) => warn!("temp manifest cleanup skipped: {e}"),
        }
    }
}

fn merge(
    remote: &BTreeMap<String, String>,
    local: &BTreeMap<String, String>,
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = remote.clone();
    merged.extend(local.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
