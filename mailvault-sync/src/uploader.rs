//! Backup stage: publish every pending catalog entry as a remote docset.
//!
//! Entries fan out over a worker pool; each worker stages a docset, runs a
//! verified publish of the message object, then best-effort uploads of the
//! attachments and metadata. Only after the message object verifies does
//! the catalog row advance and the manifest queue learn the new object, so
//! an interrupt or crash leaves at worst an orphaned remote file, never a
//! row that claims an unverified upload.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use mailvault_catalog::Catalog;
use mailvault_core::types::CatalogEntry;
use mailvault_engine::{StatKey, Stats, TaskOutcome, WorkerPool};
use mailvault_remote::RemoteStore;

use crate::docset::{DocsetBundle, MESSAGE_FILE, METADATA_FILE};
use crate::error::SyncError;
use crate::manifest::ManifestSync;
use crate::pipeline::StageContext;
use crate::transfer;

/// What the backup stage did, for the caller's summary line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub published: u64,
    pub failed: u64,
    /// Entries never attempted because of an interrupt.
    pub skipped: u64,
}

/// Upload all pending messages. Flushes the manifest queue afterwards even
/// when nothing was pending, because recovery may have left entries queued
/// from an earlier run.
pub fn run_backup(ctx: &StageContext) -> Result<UploadReport, SyncError> {
    let pending = ctx.catalog.fetch_pending_sync()?;
    info!("backup: {} message(s) pending upload", pending.len());

    let mut report = UploadReport::default();
    if !pending.is_empty() {
        let pool =
            WorkerPool::new(Arc::clone(&ctx.hub), ctx.settings.workers.upload_workers, "upload")?
                .with_progress_every(ctx.settings.workers.progress_every);

        let catalog = Arc::clone(&ctx.catalog);
        let store = Arc::clone(&ctx.store);
        let manifest = Arc::clone(&ctx.manifest);
        let stats = Arc::clone(&ctx.stats);
        let staging = ctx.layout.staging.join("docsets");
        let attempts = ctx.settings.transfer.publish_attempts;

        let results = pool.map(
            move |entry: &CatalogEntry| {
                upload_entry(entry, &staging, &catalog, store.as_ref(), &manifest, &stats, attempts)
            },
            pending,
        );
        let interrupted = pool.is_interrupted();

        for result in results {
            match result.outcome {
                TaskOutcome::Done(()) => report.published += 1,
                TaskOutcome::Failed(e) => {
                    report.failed += 1;
                    ctx.stats.increment(StatKey::Failed);
                    warn!("upload failed for {}: {e}", result.item.fingerprint.short());
                }
                TaskOutcome::Cancelled => report.skipped += 1,
            }
        }

        if interrupted {
            ctx.manifest.persist_queue();
            warn!(
                "backup interrupted: {} published, {} never started",
                report.published, report.skipped
            );
            return Err(SyncError::Interrupted);
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
        "backup finished: {} published, {} failed, {} skipped",
        report.published, report.failed, report.skipped
    );
    Ok(report)
}

/// Publish one entry end to end. Runs on a pool worker.
fn upload_entry(
    entry: &CatalogEntry,
    staging: &Path,
    catalog: &Catalog,
    store: &dyn RemoteStore,
    manifest: &ManifestSync,
    stats: &Stats,
    attempts: u32,
) -> Result<(), SyncError> {
    let bundle = DocsetBundle::build(staging, entry)?;
    let result = publish_docset(entry, &bundle, catalog, store, manifest, stats, attempts);
    bundle.cleanup();
    result
}

fn publish_docset(
    entry: &CatalogEntry,
    bundle: &DocsetBundle,
    catalog: &Catalog,
    store: &dyn RemoteStore,
    manifest: &ManifestSync,
    stats: &Stats,
    attempts: u32,
) -> Result<(), SyncError> {
    let remote_message = bundle.remote_message_path();
    transfer::publish_verified(
        store,
        &bundle.dir.join(MESSAGE_FILE),
        &remote_message,
        &bundle.content_hash,
        attempts,
    )?;

    // Attachments and metadata ride along unverified; the message object is
    // the integrity anchor and the only thing the manifest tracks.
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

    catalog.mark_synced(&entry.fingerprint, &bundle.content_hash, &remote_message)?;
    manifest.queue_entry(&remote_message, &bundle.content_hash);
    stats.increment(StatKey::Published);
    info!("published {} as {remote_message}", entry.fingerprint.short());
    Ok(())
}
