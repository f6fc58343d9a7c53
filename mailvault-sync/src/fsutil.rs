//! Atomic local writes shared by the manifest and docset layers.
//!
//! Write flow: serialize → `.tmp` sibling → `rename`. The `.tmp` sibling is
//! always in the same directory as the target (same filesystem, so the
//! rename is atomic). A failed write removes the sibling best-effort.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{io_err, SyncError};

pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), SyncError> {
    let tmp = tmp_sibling(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_err(path, e)
    })?;
    Ok(())
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), SyncError> {
    let json = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &json)
}

fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_owned());
    path.with_file_name(format!("{name}.tmp"))
}
