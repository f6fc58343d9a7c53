//! Rotation stage: fold old years into one `tar.zst` archive per year.
//!
//! A year past the retention window is rebuilt as a single archive object
//! at `<year>/_archives/messages_<year>.tar.zst`. The rebuild merges the
//! existing archive (if any) with the live docsets still on the remote,
//! and on a name collision the archive copy wins, so a re-run after a
//! partial rotation never regresses already-archived content.
//!
//! Each docset's `metadata.json` is stamped with `archived_at` during the
//! merge, and the stamped copies are pushed back so the remote metadata
//! matches the archive. Requires `tar` and `zstd` on `PATH`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Datelike, Utc};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use mailvault_catalog::Catalog;
use mailvault_engine::{StatKey, Stats, TaskOutcome, WorkerPool};
use mailvault_remote::{exec, RemoteStore};

use crate::docset::METADATA_FILE;
use crate::error::{io_err, SyncError};
use crate::fsutil;
use crate::hash;
use crate::manifest::ManifestSync;
use crate::pipeline::StageContext;
use crate::transfer;

/// What the rotation stage did, for the caller's summary line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RotateReport {
    pub archived_years: u64,
    /// Messages newly folded into an archive this run.
    pub messages: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Debug)]
enum YearOutcome {
    Archived { messages: u64 },
    /// Already fully archived; nothing to do.
    Skipped,
    /// The remote has neither live docsets nor an archive for this year.
    Unavailable,
}

/// Archive every catalog year at or below `current year - retention`.
pub fn run_rotate(ctx: &StageContext) -> Result<RotateReport, SyncError> {
    let target_year = Utc::now().year() - ctx.settings.rotation.retention_years;
    let years = ctx.catalog.candidate_years_up_to(target_year)?;
    if years.is_empty() {
        info!("rotation: no years at or below {target_year} to archive");
        return Ok(RotateReport::default());
    }
    info!("rotation: {} candidate year(s) at or below {target_year}: {years:?}", years.len());

    let pool = WorkerPool::new(Arc::clone(&ctx.hub), ctx.settings.workers.upload_workers, "archive")?
        .with_progress_every(ctx.settings.workers.progress_every);

    let catalog = Arc::clone(&ctx.catalog);
    let store = Arc::clone(&ctx.store);
    let manifest = Arc::clone(&ctx.manifest);
    let stats = Arc::clone(&ctx.stats);
    let staging = ctx.layout.staging.join("rotation");

    let results = pool.map(
        move |year: &i32| {
            archive_year(*year, &staging, &catalog, store.as_ref(), &manifest, &stats)
        },
        years,
    );
    let interrupted = pool.is_interrupted();

    let mut report = RotateReport::default();
    for result in results {
        match result.outcome {
            TaskOutcome::Done(YearOutcome::Archived { messages }) => {
                report.archived_years += 1;
                report.messages += messages;
            }
            TaskOutcome::Done(YearOutcome::Skipped) => report.skipped += 1,
            TaskOutcome::Done(YearOutcome::Unavailable) => report.failed += 1,
            TaskOutcome::Failed(e) => {
                report.failed += 1;
                ctx.stats.increment(StatKey::Failed);
                warn!("rotation failed for year {}: {e}", result.item);
            }
            TaskOutcome::Cancelled => report.skipped += 1,
        }
    }

    if interrupted {
        ctx.manifest.persist_queue();
        warn!("rotation interrupted: {} year(s) archived", report.archived_years);
        return Err(SyncError::Interrupted);
    }

    match ctx.manifest.flush_if_needed(ctx.store.as_ref()) {
        Ok(()) => {}
        Err(SyncError::ManifestConflict { attempts }) => {
            error!("manifest flush conflicted after {attempts} attempt(s); entries stay queued");
        }
        Err(e) => return Err(e),
    }

    info!(
        "rotation finished: {} year(s) archived ({} message(s)), {} skipped, {} failed",
        report.archived_years, report.messages, report.skipped, report.failed
    );
    Ok(report)
}

/// Per-year scratch layout under the rotation staging dir. Recreated from
/// scratch on entry; stale content from a dead run must not leak into the
/// new archive.
struct YearScratch {
    root: PathBuf,
    extracted: PathBuf,
    merged: PathBuf,
    fresh: PathBuf,
}

impl YearScratch {
    fn create(staging: &Path, year: i32) -> Result<YearScratch, SyncError> {
        let root = staging.join(year.to_string());
        if root.exists() {
            fs::remove_dir_all(&root).map_err(|e| io_err(&root, e))?;
        }
        let scratch = YearScratch {
            extracted: root.join("extracted"),
            merged: root.join("merged"),
            fresh: root.join("fresh"),
            root,
        };
        for dir in [&scratch.extracted, &scratch.merged, &scratch.fresh] {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        Ok(scratch)
    }

    fn remove(&self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            debug!("could not clean rotation staging {}: {e}", self.root.display());
        }
    }
}

/// Rebuild one year's archive. Runs on a pool worker.
fn archive_year(
    year: i32,
    staging: &Path,
    catalog: &Catalog,
    store: &dyn RemoteStore,
    manifest: &ManifestSync,
    stats: &Stats,
) -> Result<YearOutcome, SyncError> {
    let unarchived = catalog.unarchived_paths_for_year(year)?;
    let archive_rel = format!("{year}/_archives/messages_{year}.tar.zst");

    if unarchived.is_empty() && store.exists(&archive_rel)? {
        info!("year {year}: already archived, skipping");
        stats.increment(StatKey::Skipped);
        return Ok(YearOutcome::Skipped);
    }

    let scratch = YearScratch::create(staging, year)?;
    let result = rebuild_year(year, &archive_rel, &scratch, catalog, store, manifest, stats);
    scratch.remove();
    result
}

fn rebuild_year(
    year: i32,
    archive_rel: &str,
    scratch: &YearScratch,
    catalog: &Catalog,
    store: &dyn RemoteStore,
    manifest: &ManifestSync,
    stats: &Stats,
) -> Result<YearOutcome, SyncError> {
    let old_archive = scratch.root.join(format!("messages_{year}.tar.zst"));
    let have_archive = store.fetch(archive_rel, &old_archive)?;
    if have_archive {
        exec::run_checked(
            "tar",
            &[
                "-I".to_owned(),
                "zstd".to_owned(),
                "-xf".to_owned(),
                old_archive.display().to_string(),
                "-C".to_owned(),
                scratch.extracted.display().to_string(),
            ],
        )?;
    }

    let have_live = store.fetch_tree(&year.to_string(), &scratch.fresh, Some("_archives/**"))?;
    if !have_live && !have_archive {
        warn!("year {year}: nothing on the remote to archive");
        return Ok(YearOutcome::Unavailable);
    }

    // Archive wins on collision: extracted content goes in first, live
    // docsets fill only the gaps.
    copy_tree(&scratch.extracted, &scratch.merged, false)?;
    copy_tree(&scratch.fresh, &scratch.merged, true)?;

    let stamped = stamp_archived(&scratch.merged);

    let new_archive = scratch.root.join(format!("messages_{year}.next.tar.zst"));
    exec::run_checked(
        "tar",
        &[
            "-I".to_owned(),
            "zstd -T0".to_owned(),
            "-cf".to_owned(),
            new_archive.display().to_string(),
            "-C".to_owned(),
            scratch.merged.display().to_string(),
            ".".to_owned(),
        ],
    )?;

    transfer::publish(store, &new_archive, archive_rel)?;
    let marked = catalog.mark_archived_for_year(year)?;
    manifest.queue_entry(archive_rel, &hash::sha256_file(&new_archive)?);

    // Stamped metadata goes back out so browsing the store shows archive
    // membership without opening the tarball.
    if let Err(e) = store.push_tree(&scratch.merged, &year.to_string(), Some("**/metadata.json")) {
        warn!("year {year}: could not push stamped metadata: {e}");
    }

    stats.add(StatKey::Archived, stamped);
    info!("year {year}: archived ({stamped} newly archived message(s), {marked} catalog row(s))");
    Ok(YearOutcome::Archived { messages: stamped })
}

/// Copy `src` into `dest` recursively. With `keep_existing`, files already
/// present in `dest` are left alone.
fn copy_tree(src: &Path, dest: &Path, keep_existing: bool) -> Result<(), SyncError> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            let io = e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk failed"));
            io_err(src, io)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(src) else { continue };
        let target = dest.join(rel);
        if keep_existing && target.exists() {
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        fs::copy(entry.path(), &target).map_err(|e| io_err(entry.path(), e))?;
    }
    Ok(())
}

/// Set `archived_at` in every not-yet-stamped `metadata.json` under `root`.
/// Returns how many were stamped; unreadable files are logged and left as
/// they are.
fn stamp_archived(root: &Path) -> u64 {
    let stamp = Utc::now().to_rfc3339();
    let mut stamped = 0u64;
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() || entry.file_name() != METADATA_FILE {
            continue;
        }
        match stamp_one(entry.path(), &stamp) {
            Ok(true) => stamped += 1,
            Ok(false) => {}
            Err(e) => warn!("could not stamp {}: {e}", entry.path().display()),
        }
    }
    stamped
}

fn stamp_one(path: &Path, stamp: &str) -> Result<bool, SyncError> {
    let bytes = fs::read(path).map_err(|e| io_err(path, e))?;
    let mut obj: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&bytes)?;
    if obj.get("archived_at").is_some_and(|v| !v.is_null()) {
        return Ok(false);
    }
    obj.insert("archived_at".to_owned(), serde_json::Value::String(stamp.to_owned()));
    fsutil::write_json_atomic(path, &obj)?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, bytes: &[u8]) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, bytes).expect("write");
    }

    #[test]
    fn copy_tree_archive_wins_on_collision() {
        let tmp = TempDir::new().expect("tempdir");
        let extracted = tmp.path().join("extracted");
        let fresh = tmp.path().join("fresh");
        let merged = tmp.path().join("merged");
        write(&extracted.join("a/message.eml"), b"archived copy");
        write(&fresh.join("a/message.eml"), b"live copy");
        write(&fresh.join("b/message.eml"), b"only live");

        copy_tree(&extracted, &merged, false).expect("first pass");
        copy_tree(&fresh, &merged, true).expect("second pass");

        assert_eq!(fs::read(merged.join("a/message.eml")).expect("read"), b"archived copy");
        assert_eq!(fs::read(merged.join("b/message.eml")).expect("read"), b"only live");
    }

    #[test]
    fn stamping_skips_already_archived_metadata() {
        let tmp = TempDir::new().expect("tempdir");
        let fresh = tmp.path().join("2020/docset-a").join(METADATA_FILE);
        let done = tmp.path().join("2020/docset-b").join(METADATA_FILE);
        write(&fresh, br#"{"fingerprint":"aa","archived_at":null}"#);
        write(&done, br#"{"fingerprint":"bb","archived_at":"2024-01-01T00:00:00+00:00"}"#);

        assert_eq!(stamp_archived(tmp.path()), 1);

        let stamped: serde_json::Value =
            serde_json::from_slice(&fs::read(&fresh).expect("read")).expect("parse");
        assert!(stamped["archived_at"].is_string());
        let untouched: serde_json::Value =
            serde_json::from_slice(&fs::read(&done).expect("read")).expect("parse");
        assert_eq!(untouched["archived_at"], "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn stamping_tolerates_garbage_metadata() {
        let tmp = TempDir::new().expect("tempdir");
        let bad = tmp.path().join("2020/docset-x").join(METADATA_FILE);
        let good = tmp.path().join("2020/docset-y").join(METADATA_FILE);
        write(&bad, b"not json at all");
        write(&good, br#"{"fingerprint":"cc"}"#);

        assert_eq!(stamp_archived(tmp.path()), 1);
        assert_eq!(fs::read(&bad).expect("read"), b"not json at all");
    }
}
