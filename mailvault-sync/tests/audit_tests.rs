use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mailvault_catalog::Catalog;
use mailvault_core::config::Settings;
use mailvault_core::types::{Fingerprint, NewMessage};
use mailvault_engine::{InterruptHub, StatKey, Stats};
use mailvault_remote::{DirStore, RemoteError, RemoteStore};
use mailvault_sync::hash::sha256_hex;
use mailvault_sync::{run_audit, AuditOutcome, AuditReport, ManifestSync, StageContext};
use tempfile::TempDir;

fn context_with_store(tmp: &TempDir, store: Arc<dyn RemoteStore>) -> StageContext {
    let mut settings = Settings::default();
    settings.paths.state_dir = tmp.path().join("state");
    settings.workers.upload_workers = 2;
    settings.workers.hash_workers = 2;
    let layout = settings.layout_at(tmp.path());
    fs::create_dir_all(&layout.state_dir).expect("state dir");
    let catalog = Arc::new(Catalog::open(&layout.db).expect("catalog"));
    let manifest = Arc::new(ManifestSync::new(&layout, &settings.manifest));
    StageContext {
        settings,
        layout,
        catalog,
        store,
        manifest,
        stats: Arc::new(Stats::new()),
        hub: Arc::new(InterruptHub::new()),
    }
}

fn context(tmp: &TempDir) -> StageContext {
    let store = DirStore::create(tmp.path().join("store")).expect("store");
    context_with_store(tmp, Arc::new(store))
}

fn store_root(tmp: &TempDir) -> PathBuf {
    tmp.path().join("store")
}

fn put_object(tmp: &TempDir, remote: &str, bytes: &[u8]) {
    let path = store_root(tmp).join(remote);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, bytes).expect("write object");
}

fn record_synced(ctx: &StageContext, fp: &str, source: &Path, remote: &str, local_hash: &str) {
    let msg = NewMessage {
        fingerprint: Fingerprint::from(fp),
        source_path: source.to_path_buf(),
        sender: "ann@example.com".into(),
        subject: format!("mail {fp}"),
        message_date: "2024-03-05T08:30:00Z".into(),
        attachments: vec![],
        spam: false,
    };
    ctx.catalog.record_message(&msg).expect("record");
    ctx.catalog.mark_synced(&Fingerprint::from(fp), local_hash, remote).expect("mark synced");
}

fn completed(outcome: AuditOutcome) -> AuditReport {
    match outcome {
        AuditOutcome::Completed(report) => report,
        AuditOutcome::Unverifiable => panic!("expected a completed audit"),
    }
}

#[test]
fn classifies_ok_missing_mismatched_and_skipped() {
    let tmp = TempDir::new().expect("tempdir");
    let ctx = context(&tmp);
    let missing_source = tmp.path().join("nowhere.eml");

    record_synced(&ctx, "aaaa11", &missing_source, "2024/a/message.eml", "hash-a");
    record_synced(&ctx, "bbbb22", &missing_source, "2024/b/message.eml", "hash-b");
    record_synced(&ctx, "cccc33", &missing_source, "2024/c/message.eml", "hash-c");
    record_synced(&ctx, "dddd44", &missing_source, "", "hash-d");

    // manifest: a matches, c diverges, b absent
    put_object(&tmp, "manifest.csv", b"hash-a,2024/a/message.eml\nstale,2024/c/message.eml\n");

    let report = completed(run_audit(&ctx, false).expect("audit"));
    assert_eq!(report.checked, 3);
    assert_eq!(report.ok, 1);
    assert_eq!(report.missing, 1);
    assert_eq!(report.mismatched, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.repaired, 0);
    assert_eq!(ctx.stats.get(StatKey::Verified), 3);
}

#[test]
fn repair_republishes_and_repoints_divergent_rows() {
    let tmp = TempDir::new().expect("tempdir");
    let ctx = context(&tmp);

    let body_b = b"Subject: b\n\nbody of b\n".to_vec();
    let body_c = b"Subject: c\n\nbody of c\n".to_vec();
    let src_b = tmp.path().join("b.eml");
    let src_c = tmp.path().join("c.eml");
    fs::write(&src_b, &body_b).expect("write b");
    fs::write(&src_c, &body_c).expect("write c");

    record_synced(&ctx, "bbbb22", &src_b, "2024/old-b/message.eml", &sha256_hex(&body_b));
    record_synced(&ctx, "cccc33", &src_c, "2024/old-c/message.eml", &sha256_hex(&body_c));

    // b's object is gone entirely; c's manifest hash diverged
    put_object(&tmp, "manifest.csv", b"stale,2024/old-c/message.eml\n");

    let report = completed(run_audit(&ctx, true).expect("audit"));
    assert_eq!(report.missing, 1);
    assert_eq!(report.mismatched, 1);
    assert_eq!(report.repaired, 2);
    assert_eq!(report.repair_failed, 0);
    assert_eq!(ctx.stats.get(StatKey::Repaired), 2);

    for (fp, old_remote, body) in [
        ("bbbb22", "2024/old-b/message.eml", &body_b),
        ("cccc33", "2024/old-c/message.eml", &body_c),
    ] {
        let row = ctx
            .catalog
            .fetch_synced()
            .expect("fetch synced")
            .into_iter()
            .find(|r| r.fingerprint.0 == fp)
            .expect("row present");
        let new_remote = row.remote_path.expect("remote path set");
        assert_ne!(new_remote, old_remote, "row must point at the repaired object");
        let bytes = ctx.store.cat(&new_remote).expect("cat").expect("repaired object");
        assert_eq!(&bytes, body);

        let metadata = new_remote.replace("message.eml", "metadata.json");
        assert!(ctx.store.exists(&metadata).expect("exists"), "metadata republished");
    }

    // the manifest flush recorded the repaired objects
    let manifest = ctx.store.cat("manifest.csv").expect("cat").expect("manifest");
    let manifest = String::from_utf8(manifest).expect("utf8");
    assert!(manifest.contains(&sha256_hex(&body_b)), "repaired hash in manifest");
}

#[test]
fn failed_repair_leaves_the_row_byte_identical() {
    let tmp = TempDir::new().expect("tempdir");
    let ctx = context(&tmp);

    // source is gone and so is the remote object; repair has nothing to work from
    record_synced(&ctx, "eeee55", &tmp.path().join("vanished.eml"), "2024/e/message.eml", "hash-e");
    put_object(&tmp, "manifest.csv", b"");

    let report = completed(run_audit(&ctx, true).expect("audit"));
    assert_eq!(report.missing, 1);
    assert_eq!(report.repaired, 0);
    assert_eq!(report.repair_failed, 1);
    assert_eq!(ctx.stats.get(StatKey::Failed), 1);

    let row = &ctx.catalog.fetch_synced().expect("fetch synced")[0];
    assert_eq!(row.remote_path.as_deref(), Some("2024/e/message.eml"));
    assert_eq!(row.local_hash.as_deref(), Some("hash-e"));
}

#[test]
fn hashsum_fallback_when_manifest_is_absent() {
    let tmp = TempDir::new().expect("tempdir");
    let ctx = context(&tmp);

    let body = b"Subject: a\n\nintact\n";
    put_object(&tmp, "2024/a/message.eml", body);
    record_synced(&ctx, "aaaa11", &tmp.path().join("gone.eml"), "2024/a/message.eml", &sha256_hex(body));

    let report = completed(run_audit(&ctx, false).expect("audit"));
    assert_eq!(report.checked, 1);
    assert_eq!(report.ok, 1);
    assert_eq!(report.missing, 0);
}

// ---------------------------------------------------------------------------
// Degraded backends
// ---------------------------------------------------------------------------

/// Backend that cannot hash server-side; everything else delegates.
struct NoHashStore {
    inner: DirStore,
}

impl RemoteStore for NoHashStore {
    fn target(&self) -> String {
        self.inner.target()
    }
    fn copy_to(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.inner.copy_to(local, remote)
    }
    fn fetch(&self, remote: &str, local: &Path) -> Result<bool, RemoteError> {
        self.inner.fetch(remote, local)
    }
    fn move_to(&self, src: &str, dst: &str) -> Result<(), RemoteError> {
        self.inner.move_to(src, dst)
    }
    fn cat(&self, remote: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        self.inner.cat(remote)
    }
    fn hashsum(&self, _glob: &str) -> Result<Option<BTreeMap<String, String>>, RemoteError> {
        Ok(None)
    }
    fn list(&self, glob: &str) -> Result<Vec<String>, RemoteError> {
        self.inner.list(glob)
    }
    fn delete(&self, remote: &str) -> Result<(), RemoteError> {
        self.inner.delete(remote)
    }
    fn exists(&self, remote: &str) -> Result<bool, RemoteError> {
        self.inner.exists(remote)
    }
    fn fetch_tree(
        &self,
        prefix: &str,
        local: &Path,
        exclude: Option<&str>,
    ) -> Result<bool, RemoteError> {
        self.inner.fetch_tree(prefix, local, exclude)
    }
    fn push_tree(
        &self,
        local: &Path,
        prefix: &str,
        include: Option<&str>,
    ) -> Result<(), RemoteError> {
        self.inner.push_tree(local, prefix, include)
    }
}

#[test]
fn streams_object_hashes_when_backend_cannot_hash() {
    let tmp = TempDir::new().expect("tempdir");
    let store = NoHashStore { inner: DirStore::create(store_root(&tmp)).expect("store") };
    let ctx = context_with_store(&tmp, Arc::new(store));

    let body = b"Subject: a\n\nstreamed\n";
    put_object(&tmp, "2024/a/message.eml", body);
    record_synced(&ctx, "aaaa11", &tmp.path().join("gone.eml"), "2024/a/message.eml", &sha256_hex(body));

    let report = completed(run_audit(&ctx, false).expect("audit"));
    assert_eq!(report.ok, 1);
    assert_eq!(report.missing, 0);
}

/// Backend where every hash source fails: no manifest, no hashsum, listing
/// errors out.
struct BlindStore;

impl RemoteStore for BlindStore {
    fn target(&self) -> String {
        "blind:".to_owned()
    }
    fn copy_to(&self, _local: &Path, _remote: &str) -> Result<(), RemoteError> {
        Ok(())
    }
    fn fetch(&self, _remote: &str, _local: &Path) -> Result<bool, RemoteError> {
        Ok(false)
    }
    fn move_to(&self, _src: &str, _dst: &str) -> Result<(), RemoteError> {
        Ok(())
    }
    fn cat(&self, _remote: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        Ok(None)
    }
    fn hashsum(&self, _glob: &str) -> Result<Option<BTreeMap<String, String>>, RemoteError> {
        Ok(None)
    }
    fn list(&self, glob: &str) -> Result<Vec<String>, RemoteError> {
        Err(RemoteError::CommandFailed {
            cmd: format!("lsjson {glob}"),
            code: 1,
            stderr: "injected".to_owned(),
        })
    }
    fn delete(&self, _remote: &str) -> Result<(), RemoteError> {
        Ok(())
    }
    fn exists(&self, _remote: &str) -> Result<bool, RemoteError> {
        Ok(false)
    }
    fn fetch_tree(
        &self,
        _prefix: &str,
        _local: &Path,
        _exclude: Option<&str>,
    ) -> Result<bool, RemoteError> {
        Ok(false)
    }
    fn push_tree(
        &self,
        _local: &Path,
        _prefix: &str,
        _include: Option<&str>,
    ) -> Result<(), RemoteError> {
        Ok(())
    }
}

#[test]
fn unverifiable_when_every_hash_source_fails() {
    let tmp = TempDir::new().expect("tempdir");
    let ctx = context_with_store(&tmp, Arc::new(BlindStore));
    record_synced(&ctx, "aaaa11", &tmp.path().join("gone.eml"), "2024/a/message.eml", "hash-a");

    match run_audit(&ctx, true).expect("audit") {
        AuditOutcome::Unverifiable => {}
        AuditOutcome::Completed(report) => panic!("expected unverifiable, got {report:?}"),
    }

    assert_eq!(ctx.stats.get(StatKey::Verified), 0);
    let row = &ctx.catalog.fetch_synced().expect("fetch synced")[0];
    assert_eq!(row.remote_path.as_deref(), Some("2024/a/message.eml"), "row untouched");
}
