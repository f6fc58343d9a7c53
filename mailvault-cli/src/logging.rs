//! Log file rotation and `tracing` subscriber setup.
//!
//! The subscriber carries two layers: a console layer for the terminal and
//! a plain-text (no ANSI) layer appending to the log file under the state
//! directory. Both honor `RUST_LOG`, defaulting to `info`. The log file is
//! size-rotated before the subscriber opens it:
//!   mailvault.log → mailvault.log.1 → … → mailvault.log.<max_files>

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailvault_core::config::LogSettings;

/// Rotate `log_path` once its size reaches `max_bytes`.
///
/// Rotation sequence (oldest first): `<name>.<max_files>` is deleted,
/// `<name>.<n>` moves to `<name>.<n+1>`, the live file becomes `<name>.1`
/// and a fresh empty file takes its place. Returns `true` if a rotation
/// happened; a missing file is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    let _ = OpenOptions::new().create(true).truncate(true).write(true).open(log_path)?;
    Ok(true)
}

/// Install the global subscriber and rotate the log file first.
///
/// When the log file cannot be opened the console layer still comes up and
/// the failure is reported there; a broken log path must not stop a backup.
pub fn init(log_path: &Path, settings: &LogSettings) {
    let rotated =
        match rotate_if_needed(log_path, settings.max_log_bytes, settings.max_log_files) {
            Ok(rotated) => rotated,
            Err(err) => {
                eprintln!("warning: log rotation failed for {}: {err}", log_path.display());
                false
            }
        };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_target(false);

    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => {
            let file_layer = fmt::layer().with_ansi(false).with_target(false).with_writer(file);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file_layer)
                .try_init();
        }
        Err(err) => {
            let _ = tracing_subscriber::registry().with(filter).with(console).try_init();
            tracing::warn!(
                "could not open {}: {err}; logging to the console only",
                log_path.display()
            );
        }
    }

    if rotated {
        info!("rotated oversized log file {}", log_path.display());
    }
}

/// Path of the `n`-th rotated copy of `base` (e.g. `mailvault.log.2`).
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base.file_name().and_then(|s| s.to_str()).unwrap_or("mailvault.log");
    base.with_file_name(format!("{name}.{n}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
