//! Settings file and on-disk state layout.
//!
//! # Storage layout
//!
//! ```text
//! ~/.local/share/mailvault/        (state_dir — overridable)
//!   catalog.db                     (message catalog, SQLite)
//!   manifest.csv                   (local mirror of the remote manifest)
//!   manifest.queue.json            (crash-recovery queue snapshot)
//!   manifest.uploading             (CAS in-progress marker)
//!   staging/                       (docset + rotation scratch, removable)
//!   mailvault.log                  (file log, size-rotated)
//! ```
//!
//! # API pattern
//!
//! Path resolution comes in two forms:
//! - `layout_at(home: &Path)` — explicit home; used in tests with `TempDir`
//! - `layout()` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrapper; always use `_at`.
//!
//! Every field has a default, so an empty settings file is valid and any
//! section may be omitted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings file names probed when `--config` is not given, in order:
/// `./mailvault.yaml`, then `~/.config/mailvault/config.yaml`.
pub const LOCAL_SETTINGS_FILE: &str = "mailvault.yaml";
pub const USER_SETTINGS_FILE: &str = ".config/mailvault/config.yaml";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Root settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub remote: RemoteSettings,
    #[serde(default)]
    pub manifest: ManifestSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub rotation: RotationSettings,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub status: StatusSettings,
    #[serde(default)]
    pub logging: LogSettings,
}

/// Filesystem locations. `~` expands against the user's home directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathSettings {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Override for the catalog database (default `<state_dir>/catalog.db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// Override for the scratch area (default `<state_dir>/staging`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
    /// Override for the log file (default `<state_dir>/mailvault.log`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

/// Remote store selection and rclone tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSettings {
    /// `remote:path` for an rclone backend, or a plain directory path for
    /// the filesystem backend. Empty means "not configured".
    #[serde(default)]
    pub target: String,
    #[serde(default = "default_rclone_binary")]
    pub rclone_binary: String,
    #[serde(default = "default_rclone_log_level")]
    pub rclone_log_level: String,
    #[serde(default = "default_transfers")]
    pub transfers: u32,
    #[serde(default = "default_streams")]
    pub multi_thread_streams: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestSettings {
    /// Canonical manifest object name at the store root.
    #[serde(default = "default_manifest_name")]
    pub remote_name: String,
    /// CAS retry bound before degrading to a conflict copy.
    #[serde(default = "default_manifest_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSettings {
    #[serde(default = "default_upload_workers")]
    pub upload_workers: usize,
    /// Pool size for the stream-hash audit fallback.
    #[serde(default = "default_hash_workers")]
    pub hash_workers: usize,
    /// Log a progress line every N completed tasks.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferSettings {
    /// Verified-publish attempt bound.
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotationSettings {
    /// Years kept live before a year becomes an archive candidate.
    #[serde(default = "default_retention_years")]
    pub retention_years: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditSettings {
    /// Repair divergent entries (vs. report-only).
    #[serde(default = "default_true")]
    pub repair: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchSettings {
    /// External command that refreshes the local mail store.
    #[serde(default = "default_fetch_command")]
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusSettings {
    /// Cadence of the periodic counter summary, in seconds. 0 disables it.
    #[serde(default = "default_status_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSettings {
    #[serde(default = "default_max_log_bytes")]
    pub max_log_bytes: u64,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_state_dir() -> PathBuf {
    PathBuf::from("~/.local/share/mailvault")
}
fn default_rclone_binary() -> String {
    "rclone".to_owned()
}
fn default_rclone_log_level() -> String {
    "INFO".to_owned()
}
fn default_transfers() -> u32 {
    4
}
fn default_streams() -> u32 {
    4
}
fn default_manifest_name() -> String {
    "manifest.csv".to_owned()
}
fn default_manifest_retries() -> u32 {
    3
}
fn default_upload_workers() -> usize {
    4
}
fn default_hash_workers() -> usize {
    8
}
fn default_progress_every() -> usize {
    25
}
fn default_publish_attempts() -> u32 {
    3
}
fn default_retention_years() -> i32 {
    2
}
fn default_true() -> bool {
    true
}
fn default_fetch_command() -> String {
    "mbsync -a".to_owned()
}
fn default_status_interval() -> u64 {
    300
}
fn default_max_log_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_max_log_files() -> usize {
    5
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            db_path: None,
            staging_dir: None,
            log_path: None,
        }
    }
}
impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            target: String::new(),
            rclone_binary: default_rclone_binary(),
            rclone_log_level: default_rclone_log_level(),
            transfers: default_transfers(),
            multi_thread_streams: default_streams(),
        }
    }
}
impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            remote_name: default_manifest_name(),
            max_retries: default_manifest_retries(),
        }
    }
}
impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            upload_workers: default_upload_workers(),
            hash_workers: default_hash_workers(),
            progress_every: default_progress_every(),
        }
    }
}
impl Default for TransferSettings {
    fn default() -> Self {
        Self { publish_attempts: default_publish_attempts() }
    }
}
impl Default for RotationSettings {
    fn default() -> Self {
        Self { retention_years: default_retention_years() }
    }
}
impl Default for AuditSettings {
    fn default() -> Self {
        Self { repair: true }
    }
}
impl Default for FetchSettings {
    fn default() -> Self {
        Self { command: default_fetch_command() }
    }
}
impl Default for StatusSettings {
    fn default() -> Self {
        Self { interval_secs: default_status_interval() }
    }
}
impl Default for LogSettings {
    fn default() -> Self {
        Self {
            max_log_bytes: default_max_log_bytes(),
            max_log_files: default_max_log_files(),
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

impl Settings {
    /// Load from an explicit path, or probe the default locations.
    ///
    /// With no explicit path and no settings file anywhere, returns
    /// `Settings::default()` — the tool runs with built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        let local = PathBuf::from(LOCAL_SETTINGS_FILE);
        if local.exists() {
            return Self::load_from(&local);
        }
        if let Some(home) = dirs::home_dir() {
            let user = home.join(USER_SETTINGS_FILE);
            if user.exists() {
                return Self::load_from(&user);
            }
        }
        Ok(Settings::default())
    }

    /// Load and parse one settings file. An empty file is valid.
    pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        if contents.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

// ---------------------------------------------------------------------------
// State layout
// ---------------------------------------------------------------------------

/// Resolved filesystem locations for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    pub state_dir: PathBuf,
    pub db: PathBuf,
    pub staging: PathBuf,
    pub log: PathBuf,
    pub manifest: PathBuf,
    pub queue: PathBuf,
    pub marker: PathBuf,
}

impl Settings {
    /// Resolve all state paths against an explicit home directory.
    pub fn layout_at(&self, home: &Path) -> StateLayout {
        let state_dir = expand_home(&self.paths.state_dir, home);
        let resolve = |override_: &Option<PathBuf>, fallback: PathBuf| match override_ {
            Some(p) => expand_home(p, home),
            None => fallback,
        };
        StateLayout {
            db: resolve(&self.paths.db_path, state_dir.join("catalog.db")),
            staging: resolve(&self.paths.staging_dir, state_dir.join("staging")),
            log: resolve(&self.paths.log_path, state_dir.join("mailvault.log")),
            manifest: state_dir.join("manifest.csv"),
            queue: state_dir.join("manifest.queue.json"),
            marker: state_dir.join("manifest.uploading"),
            state_dir,
        }
    }

    /// `layout_at` convenience wrapper (uses `dirs::home_dir()`).
    pub fn layout(&self) -> Result<StateLayout, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(self.layout_at(&home))
    }
}

/// Expand a leading `~` against `home`; other paths pass through untouched.
fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
