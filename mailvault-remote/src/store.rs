//! The backend-neutral store contract and backend selection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mailvault_core::config::RemoteSettings;
use tracing::debug;

use crate::dir_store::DirStore;
use crate::error::RemoteError;
use crate::rclone::RcloneStore;

/// One backup target. Paths are relative to the store's root; absence is a
/// normal negative, never an error.
pub trait RemoteStore: Send + Sync {
    /// Human-readable target, for logs.
    fn target(&self) -> String;

    /// Upload one local file to an exact remote name.
    fn copy_to(&self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// Download one object. `false` when the object does not exist.
    fn fetch(&self, remote: &str, local: &Path) -> Result<bool, RemoteError>;

    /// Server-side atomic rename. This is the commit point of every
    /// published object.
    fn move_to(&self, src: &str, dst: &str) -> Result<(), RemoteError>;

    /// Full object read. `None` when absent.
    fn cat(&self, remote: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    /// Native sha256 listing for objects matching `glob`, keyed by relative
    /// path. `None` when the backend cannot hash server-side.
    fn hashsum(&self, glob: &str) -> Result<Option<BTreeMap<String, String>>, RemoteError>;

    /// Recursive relative paths matching an rclone-style filter glob.
    fn list(&self, glob: &str) -> Result<Vec<String>, RemoteError>;

    /// Delete one object; deleting an absent object succeeds.
    fn delete(&self, remote: &str) -> Result<(), RemoteError>;

    fn exists(&self, remote: &str) -> Result<bool, RemoteError>;

    /// Download everything under `prefix` into `local`, preserving relative
    /// layout, skipping paths matching `exclude`. `false` when the prefix
    /// does not exist remotely.
    fn fetch_tree(
        &self,
        prefix: &str,
        local: &Path,
        exclude: Option<&str>,
    ) -> Result<bool, RemoteError>;

    /// Upload a local tree under `prefix`, keeping only paths matching
    /// `include` when given.
    fn push_tree(
        &self,
        local: &Path,
        prefix: &str,
        include: Option<&str>,
    ) -> Result<(), RemoteError>;
}

/// A target with a colon before any slash is an rclone remote
/// (`nextcloud:Backups/Email`); anything else is a local directory.
pub(crate) fn is_rclone_target(target: &str) -> bool {
    match target.find(':') {
        Some(colon) => match target.find('/') {
            Some(slash) => colon < slash,
            None => true,
        },
        None => false,
    }
}

/// Build the backend the configured target calls for.
pub fn open(settings: &RemoteSettings) -> Result<Box<dyn RemoteStore>, RemoteError> {
    if is_rclone_target(&settings.target) {
        debug!("remote backend: rclone ({})", settings.target);
        Ok(Box::new(RcloneStore::from_settings(settings)))
    } else {
        debug!("remote backend: directory ({})", settings.target);
        let store = DirStore::create(PathBuf::from(&settings.target))?;
        Ok(Box::new(store))
    }
}
