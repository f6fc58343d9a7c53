//! Audit stage: reconcile the catalog's view with what the store holds.
//!
//! The remote hash source is resolved in preference order:
//!
//! 1. the remote manifest (one `cat`, authoritative when present),
//! 2. store-side hashes (`hashsum`, one call when the backend supports it),
//! 3. streaming: list every message object and hash its bytes over a pool.
//!
//! Every synced catalog row is then classified against that map as ok,
//! missing or mismatched. With repair enabled, divergent rows are
//! republished from the local source through the same verified-publish
//! path the backup stage uses; a repair that cannot complete leaves the
//! row exactly as it was.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use mailvault_catalog::Catalog;
use mailvault_core::types::CatalogEntry;
use mailvault_engine::{StatKey, TaskOutcome, WorkerPool};
use mailvault_remote::RemoteStore;

use crate::docset::{DocsetBundle, MESSAGE_FILE, METADATA_FILE};
use crate::error::{io_err, SyncError};
use crate::hash;
use crate::manifest::{parse_manifest, ManifestSync};
use crate::pipeline::StageContext;
use crate::transfer;

/// Row-by-row verification tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AuditReport {
    /// Rows with a remote path, checked against the hash source.
    pub checked: u64,
    pub ok: u64,
    pub missing: u64,
    pub mismatched: u64,
    pub repaired: u64,
    pub repair_failed: u64,
    /// Rows with no remote path recorded (never published).
    pub skipped: u64,
}

/// Whether the audit could verify anything at all.
#[derive(Debug)]
pub enum AuditOutcome {
    Completed(AuditReport),
    /// No hash source could be resolved; nothing was classified.
    Unverifiable,
}

#[derive(Debug, PartialEq, Eq)]
enum RowState {
    Ok,
    Missing,
    Mismatched,
    Skipped,
}

/// Verify every synced row, optionally repairing divergence.
pub fn run_audit(ctx: &StageContext, repair: bool) -> Result<AuditOutcome, SyncError> {
    let Some(remote_hashes) = resolve_remote_hashes(ctx)? else {
        error!("audit: no hash source available, store cannot be verified");
        return Ok(AuditOutcome::Unverifiable);
    };

    let synced = ctx.catalog.fetch_synced()?;
    info!("audit: checking {} synced row(s) against {} remote hash(es)", synced.len(), remote_hashes.len());

    let mut report = AuditReport::default();
    let mut to_repair: Vec<(CatalogEntry, &'static str)> = Vec::new();
    let total = synced.len();
    for (i, entry) in synced.into_iter().enumerate() {
        match classify(&entry, &remote_hashes) {
            RowState::Skipped => {
                report.skipped += 1;
                continue;
            }
            RowState::Ok => report.ok += 1,
            RowState::Missing => {
                report.missing += 1;
                if repair {
                    to_repair.push((entry, "missing"));
                }
            }
            RowState::Mismatched => {
                report.mismatched += 1;
                if repair {
                    to_repair.push((entry, "hash mismatch"));
                }
            }
        }
        ctx.stats.increment(StatKey::Verified);
        if (i + 1) % 100 == 0 {
            info!("audit: {}/{total} row(s) checked", i + 1);
        }
    }
    report.checked = report.ok + report.missing + report.mismatched;

    for (entry, reason) in to_repair {
        if ctx.hub.is_interrupted() {
            ctx.manifest.persist_queue();
            warn!("audit interrupted: {} repair(s) done", report.repaired);
            return Err(SyncError::Interrupted);
        }
        let staging = ctx.layout.staging.join("rebuild");
        match repair_entry(
            &entry,
            reason,
            &staging,
            &ctx.catalog,
            ctx.store.as_ref(),
            &ctx.manifest,
            ctx.settings.transfer.publish_attempts,
        ) {
            Ok(()) => {
                report.repaired += 1;
                ctx.stats.increment(StatKey::Repaired);
            }
            Err(e) => {
                report.repair_failed += 1;
                ctx.stats.increment(StatKey::Failed);
                warn!("repair failed for {}: {e}", entry.fingerprint.short());
            }
        }
    }

    match ctx.manifest.flush_if_needed(ctx.store.as_ref()) {
        Ok(()) => {}
        Err(SyncError::ManifestConflict { attempts }) => {
            error!("manifest flush conflicted after {attempts} attempt(s); entries stay queued");
        }
        Err(e) => return Err(e),
    }

    info!(
        "verification result: {} ok, {} missing, {} mismatched, {} repaired, {} repair failure(s)",
        report.ok, report.missing, report.mismatched, report.repaired, report.repair_failed
    );
    ctx.stats.log_status();
    Ok(AuditOutcome::Completed(report))
}

/// One row against the hash map. Rows without a recorded remote path were
/// never published and are not the audit's business.
fn classify(entry: &CatalogEntry, remote_hashes: &BTreeMap<String, String>) -> RowState {
    let Some(remote_path) = entry.remote_path.as_deref().filter(|p| !p.is_empty()) else {
        return RowState::Skipped;
    };
    match remote_hashes.get(remote_path) {
        None => RowState::Missing,
        Some(remote_hash) => match entry.local_hash.as_deref() {
            // without a recorded upload hash, existence is all we can check
            Some(local) if !local.is_empty() && local != remote_hash => RowState::Mismatched,
            _ => RowState::Ok,
        },
    }
}

/// `None` means no source could be resolved and the audit must not guess.
fn resolve_remote_hashes(
    ctx: &StageContext,
) -> Result<Option<BTreeMap<String, String>>, SyncError> {
    let manifest_name = &ctx.settings.manifest.remote_name;
    if let Some(bytes) = ctx.store.cat(manifest_name)? {
        let entries = parse_manifest(&String::from_utf8_lossy(&bytes));
        info!("audit source: remote manifest ({} entries)", entries.len());
        return Ok(Some(entries));
    }

    warn!("remote manifest missing, trying store-side hashes");
    if let Some(map) = ctx.store.hashsum("**/message.eml")? {
        if !map.is_empty() {
            info!("audit source: store hashsum ({} object(s))", map.len());
            return Ok(Some(map));
        }
    }

    info!("audit source: streaming object hashes");
    let paths = match ctx.store.list("**/message.eml") {
        Ok(paths) => paths,
        Err(e) => {
            error!("cannot enumerate remote objects: {e}");
            return Ok(None);
        }
    };
    if paths.is_empty() {
        return Ok(Some(BTreeMap::new()));
    }

    let pool = WorkerPool::new(Arc::clone(&ctx.hub), ctx.settings.workers.hash_workers, "hash")?
        .with_progress_every(ctx.settings.workers.progress_every);
    let store = Arc::clone(&ctx.store);
    let results = pool.map(
        move |path: &String| -> Result<Option<String>, SyncError> {
            Ok(store.cat(path)?.map(|bytes| hash::sha256_hex(&bytes)))
        },
        paths,
    );
    let interrupted = pool.is_interrupted();

    let mut map = BTreeMap::new();
    for result in results {
        match result.outcome {
            TaskOutcome::Done(Some(digest)) => {
                map.insert(result.item, digest);
            }
            TaskOutcome::Done(None) => {
                debug!("object vanished while hashing: {}", result.item);
            }
            TaskOutcome::Failed(e) => warn!("could not hash {}: {e}", result.item),
            TaskOutcome::Cancelled => {}
        }
    }
    if interrupted {
        ctx.manifest.persist_queue();
        return Err(SyncError::Interrupted);
    }
    Ok(Some(map))
}

/// Republish one divergent row through the verified-publish path, then
/// repoint the catalog at the fresh object. Any failure before the repoint
/// leaves the row untouched.
fn repair_entry(
    entry: &CatalogEntry,
    reason: &str,
    staging: &Path,
    catalog: &Catalog,
    store: &dyn RemoteStore,
    manifest: &ManifestSync,
    attempts: u32,
) -> Result<(), SyncError> {
    let bundle = DocsetBundle::build(staging, entry)?;
    let result = republish(entry, reason, &bundle, catalog, store, manifest, attempts);
    bundle.cleanup();
    result
}

fn republish(
    entry: &CatalogEntry,
    reason: &str,
    bundle: &DocsetBundle,
    catalog: &Catalog,
    store: &dyn RemoteStore,
    manifest: &ManifestSync,
    attempts: u32,
) -> Result<(), SyncError> {
    if bundle.message_file.is_none() {
        // without the source there is nothing to republish from
        return Err(io_err(
            &entry.source_path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "source message is gone"),
        ));
    }

    let new_remote = bundle.remote_message_path();
    let old_remote = entry.remote_path.as_deref().unwrap_or("(none)");
    warn!("repairing ({reason}): {old_remote} -> {new_remote}");

    transfer::publish_verified(
        store,
        &bundle.dir.join(MESSAGE_FILE),
        &new_remote,
        &bundle.content_hash,
        attempts,
    )?;
    for name in &bundle.attachments {
        let remote = bundle.remote_path_for(name);
        if let Err(e) = transfer::publish(store, &bundle.dir.join(name), &remote) {
            warn!("attachment upload failed for {remote}: {e}");
        }
    }
    let metadata_remote = bundle.remote_path_for(METADATA_FILE);
    if let Err(e) = transfer::publish(store, &bundle.dir.join(METADATA_FILE), &metadata_remote) {
        warn!("metadata upload failed for {metadata_remote}: {e}");
    }

    catalog.update_remote_path(&entry.fingerprint, &new_remote)?;
    manifest.queue_entry(&new_remote, &bundle.content_hash);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
