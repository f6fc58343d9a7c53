//! Docset staging: one folder per message, ready for publishing.
//!
//! A docset is the remote unit for one message:
//!
//! ```text
//! <year>/<folder>/message.eml     raw message bytes
//! <year>/<folder>/metadata.json   catalog row snapshot + hashes
//! <year>/<folder>/<attachment>    extracted attachments, if any
//! ```
//!
//! `<folder>` encodes date, sender, subject and a short fingerprint so a
//! human browsing the store can find a message without the catalog. The
//! name is bounded at [`MAX_FOLDER_LEN`] and the fingerprint suffix always
//! survives truncation, so two long-subject messages never collide.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mailvault_core::dates::mail_date_or_now;
use mailvault_core::types::{CatalogEntry, Fingerprint};

use crate::error::{io_err, SyncError};
use crate::fsutil;
use crate::hash;

pub const MESSAGE_FILE: &str = "message.eml";
pub const METADATA_FILE: &str = "metadata.json";

/// Upper bound on the docset folder name, fingerprint suffix included.
pub const MAX_FOLDER_LEN: usize = 150;

/// Upper bound on one sanitized component (sender, subject, attachment).
const MAX_COMPONENT_LEN: usize = 80;

// ---------------------------------------------------------------------------
// 1. Names
// ---------------------------------------------------------------------------

/// Reduce arbitrary header text to a safe folder-name component.
///
/// Non-ASCII is dropped, path-hostile characters and control bytes map to
/// `_` one-for-one, runs of spaces collapse to a single `_`, and the
/// result is bounded at 80 characters. Text that sanitizes away entirely
/// becomes `"unknown"`.
pub fn sanitize(raw: &str) -> String {
    const ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

    let mut out = String::new();
    let mut pending_space = false;
    for ch in raw.trim().chars() {
        if !ch.is_ascii() {
            continue;
        }
        if ch == ' ' {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push('_');
        }
        pending_space = false;
        out.push(if ch.is_ascii_control() || ILLEGAL.contains(&ch) { '_' } else { ch });
    }

    // output is pure ASCII, byte truncation is char-safe
    out.truncate(MAX_COMPONENT_LEN);
    if out.is_empty() {
        "unknown".to_owned()
    } else {
        out
    }
}

/// Docset folder name: `<stamp>_from_<sender>_subject_<subject>_[<fp6>]`.
///
/// The body is truncated so that the fingerprint suffix always fits within
/// [`MAX_FOLDER_LEN`].
pub fn folder_name(
    date: &DateTime<Utc>,
    sender: &str,
    subject: &str,
    fingerprint: &Fingerprint,
) -> String {
    let stamp = date.format("%Y-%m-%d_%H-%M-%S");
    let suffix = format!("_[{}]", fingerprint.short());
    let mut body = format!("{stamp}_from_{}_subject_{}", sanitize(sender), sanitize(subject));
    let keep = MAX_FOLDER_LEN.saturating_sub(suffix.len());
    if body.len() > keep {
        body.truncate(keep);
    }
    body.push_str(&suffix);
    body
}

// ---------------------------------------------------------------------------
// 2. Bundle
// ---------------------------------------------------------------------------

/// Snapshot written next to the message so the remote store is
/// self-describing without the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocsetMetadata {
    pub metadata_version: u32,
    pub fingerprint: String,
    pub content_hash: String,
    pub sender: String,
    pub subject: String,
    pub message_date: String,
    pub source_path: String,
    pub remote_path: String,
    pub attachments: Vec<String>,
    pub spam: bool,
    pub built_at: String,
    pub archived_at: Option<String>,
}

/// One staged docset on local disk, ready to publish.
#[derive(Debug)]
pub struct DocsetBundle {
    /// Local staging directory holding the docset files.
    pub dir: PathBuf,
    pub folder: String,
    pub year: i32,
    /// Store-relative folder key, `"<year>/<folder>"`.
    pub remote_folder: String,
    /// `None` when the source message vanished before staging.
    pub message_file: Option<PathBuf>,
    pub content_hash: String,
    /// Staged attachment file names (sanitized, deduplicated).
    pub attachments: Vec<String>,
}

impl DocsetBundle {
    /// Stage a catalog entry under `staging/<year>/<folder>/`.
    ///
    /// The message file and metadata are mandatory; attachments are
    /// best-effort (a missing or unreadable attachment is logged and
    /// skipped, never fatal). When the source message itself is gone the
    /// bundle carries no message file and the caller decides what that
    /// means for publishing.
    pub fn build(staging: &Path, entry: &CatalogEntry) -> Result<DocsetBundle, SyncError> {
        let date = mail_date_or_now(&entry.message_date);
        // the catalog derived the year at record time; folder placement
        // must match it or rotation will never pick the docset up
        let year = entry.message_year;
        let folder = folder_name(&date, &entry.sender, &entry.subject, &entry.fingerprint);
        let dir = staging.join(year.to_string()).join(&folder);
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let (message_file, content_hash) = if entry.source_path.exists() {
            let bytes = fs::read(&entry.source_path).map_err(|e| io_err(&entry.source_path, e))?;
            let dest = dir.join(MESSAGE_FILE);
            fs::write(&dest, &bytes).map_err(|e| io_err(&dest, e))?;
            (Some(dest), hash::sha256_hex(&bytes))
        } else {
            debug!("source message gone, staging metadata only: {}", entry.source_path.display());
            (None, entry.best_hash().to_owned())
        };

        let mut attachments = Vec::new();
        for src in &entry.attachments {
            if !src.exists() {
                warn!("attachment missing, skipping: {}", src.display());
                continue;
            }
            let name = src
                .file_name()
                .and_then(|n| n.to_str())
                .map(sanitize)
                .unwrap_or_else(|| "attachment".to_owned());
            let dest = unique_dest(&dir, &name);
            match fs::copy(src, &dest) {
                Ok(_) => {
                    if let Some(staged) = dest.file_name().and_then(|n| n.to_str()) {
                        attachments.push(staged.to_owned());
                    }
                }
                Err(e) => warn!("cannot stage attachment {}: {e}", src.display()),
            }
        }

        let remote_folder = format!("{year}/{folder}");
        let metadata = DocsetMetadata {
            metadata_version: 1,
            fingerprint: entry.fingerprint.to_string(),
            content_hash: content_hash.clone(),
            sender: entry.sender.clone(),
            subject: entry.subject.clone(),
            message_date: entry.message_date.clone(),
            source_path: entry.source_path.display().to_string(),
            remote_path: format!("{remote_folder}/{MESSAGE_FILE}"),
            attachments: attachments.clone(),
            spam: entry.spam,
            built_at: Utc::now().to_rfc3339(),
            archived_at: None,
        };
        fsutil::write_json_atomic(&dir.join(METADATA_FILE), &metadata)?;

        Ok(DocsetBundle {
            dir,
            folder,
            year,
            remote_folder,
            message_file,
            content_hash,
            attachments,
        })
    }

    /// Store-relative key of the message object.
    pub fn remote_message_path(&self) -> String {
        format!("{}/{MESSAGE_FILE}", self.remote_folder)
    }

    /// Store-relative key for a sibling file in this docset.
    pub fn remote_path_for(&self, name: &str) -> String {
        format!("{}/{name}", self.remote_folder)
    }

    /// Remove the staging directory. Best-effort; staging is scratch space.
    pub fn cleanup(&self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("could not clean docset staging {}: {e}", self.dir.display());
            }
        }
    }
}

/// First free name in `dir`, numbering collisions `name-1.ext`, `name-2.ext`.
fn unique_dest(dir: &Path, name: &str) -> PathBuf {
    let mut dest = dir.join(name);
    let mut counter = 1;
    while dest.exists() {
        let numbered = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{counter}.{ext}"),
            _ => format!("{name}-{counter}"),
        };
        dest = dir.join(numbered);
        counter += 1;
    }
    dest
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("Hello World", "Hello_World")]
    #[case("  spaced   out  ", "spaced_out")]
    #[case("a<b>c:d", "a_b_c_d")]
    #[case("re: invoice #42?", "re__invoice_#42_")]
    #[case("émile zola", "mile_zola")]
    #[case("", "unknown")]
    #[case("日本語", "unknown")]
    #[case("tab\there", "tab_here")]
    fn sanitize_cases(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize(raw), expected);
    }

    #[test]
    fn sanitize_bounds_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize(&long).len(), MAX_COMPONENT_LEN);
    }

    #[test]
    fn folder_name_keeps_fingerprint_suffix_under_truncation() {
        let date = mail_date_or_now("2024-03-05T08:30:00Z");
        let fp = Fingerprint::from("a1b2c3d4");
        let sender = "s".repeat(100);
        let subject = "very ".repeat(60);
        let name = folder_name(&date, &sender, &subject, &fp);
        assert_eq!(name.len(), MAX_FOLDER_LEN);
        assert!(name.ends_with("_[a1b2c3]"), "suffix lost: {name}");
        assert!(name.starts_with("2024-03-05_08-30-00_from_"), "bad prefix: {name}");
    }

    #[test]
    fn folder_name_short_inputs_not_padded() {
        let date = mail_date_or_now("2024-03-05T08:30:00Z");
        let name = folder_name(&date, "a@b", "hi", &Fingerprint::from("feedface"));
        assert_eq!(name, "2024-03-05_08-30-00_from_a@b_subject_hi_[feedfa]");
    }

    fn entry_with_source(dir: &Path) -> CatalogEntry {
        let source = dir.join("raw.eml");
        std::fs::write(&source, b"Subject: hi\n\nbody\n").expect("write source");
        CatalogEntry {
            fingerprint: Fingerprint::from("cafebabe1234"),
            source_path: source,
            sender: "ann@example.com".into(),
            subject: "hello there".into(),
            message_date: "2024-03-05T08:30:00Z".into(),
            message_year: 2024,
            attachments: vec![],
            spam: false,
            synced_at: None,
            local_hash: None,
            remote_path: None,
            archived_at: None,
        }
    }

    #[test]
    fn build_stages_message_and_metadata() {
        let tmp = TempDir::new().expect("tempdir");
        let entry = entry_with_source(tmp.path());
        let staging = tmp.path().join("staging");

        let bundle = DocsetBundle::build(&staging, &entry).expect("build");
        let message = bundle.message_file.as_ref().expect("message staged");
        assert!(message.exists());
        assert_eq!(bundle.year, 2024);
        assert_eq!(bundle.remote_message_path(), format!("2024/{}/message.eml", bundle.folder));
        assert_eq!(bundle.content_hash, hash::sha256_hex(b"Subject: hi\n\nbody\n"));

        let meta: DocsetMetadata =
            serde_json::from_slice(&std::fs::read(bundle.dir.join(METADATA_FILE)).expect("read"))
                .expect("parse metadata");
        assert_eq!(meta.metadata_version, 1);
        assert_eq!(meta.fingerprint, "cafebabe1234");
        assert_eq!(meta.content_hash, bundle.content_hash);
        assert_eq!(meta.remote_path, bundle.remote_message_path());
        assert_eq!(meta.archived_at, None);

        bundle.cleanup();
        assert!(!bundle.dir.exists());
    }

    #[test]
    fn build_without_source_falls_back_to_catalog_hash() {
        let tmp = TempDir::new().expect("tempdir");
        let mut entry = entry_with_source(tmp.path());
        std::fs::remove_file(&entry.source_path).expect("remove source");
        entry.local_hash = Some("deadbeef".into());

        let bundle = DocsetBundle::build(&tmp.path().join("staging"), &entry).expect("build");
        assert!(bundle.message_file.is_none());
        assert_eq!(bundle.content_hash, "deadbeef");
        assert!(bundle.dir.join(METADATA_FILE).exists());
    }

    #[test]
    fn build_dedupes_attachment_names() {
        let tmp = TempDir::new().expect("tempdir");
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        std::fs::create_dir_all(&a).expect("mkdir");
        std::fs::create_dir_all(&b).expect("mkdir");
        std::fs::write(a.join("report.pdf"), b"one").expect("write");
        std::fs::write(b.join("report.pdf"), b"two").expect("write");

        let mut entry = entry_with_source(tmp.path());
        entry.attachments = vec![
            a.join("report.pdf"),
            b.join("report.pdf"),
            tmp.path().join("missing.bin"),
        ];

        let bundle = DocsetBundle::build(&tmp.path().join("staging"), &entry).expect("build");
        assert_eq!(bundle.attachments, vec!["report.pdf", "report-1.pdf"]);
        assert!(bundle.dir.join("report-1.pdf").exists());
    }
}
