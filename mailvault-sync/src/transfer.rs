//! Atomic, verified publishing of single objects.
//!
//! Nothing ever lands on the canonical remote name except through a
//! server-side rename of a fully-uploaded temp object, so a reader sees
//! either the old object or the new one, never a partial write.
//!
//! ```text
//! publish:           local ──copy──> remote.tmp.<uuid> ──rename──> remote
//! publish_verified:  publish, re-hash the remote object, compare; on
//!                    mismatch delete and retry, bounded.
//! ```

use std::path::Path;

use tracing::{debug, warn};
use uuid::Uuid;

use mailvault_remote::{RemoteError, RemoteStore};

use crate::error::SyncError;
use crate::hash;

/// Copy `local` to a unique temp name next to `remote`, then rename it into
/// place. On any failure the temp object is deleted best-effort and the
/// canonical name is left untouched.
pub fn publish(store: &dyn RemoteStore, local: &Path, remote: &str) -> Result<(), SyncError> {
    let temp = format!("{remote}.tmp.{}", Uuid::new_v4().simple());
    if let Err(e) = store.copy_to(local, &temp) {
        let _ = store.delete(&temp);
        return Err(e.into());
    }
    if let Err(e) = store.move_to(&temp, remote) {
        let _ = store.delete(&temp);
        return Err(e.into());
    }
    Ok(())
}

/// `publish` until the remote object's hash matches `expected_hash`, at most
/// `max_attempts` times. A missing local source is a no-op success; the
/// caller has nothing to upload and nothing to verify.
///
/// Exhaustion returns [`SyncError::Verification`]; the caller must not mark
/// the item synced.
pub fn publish_verified(
    store: &dyn RemoteStore,
    local: &Path,
    remote: &str,
    expected_hash: &str,
    max_attempts: u32,
) -> Result<(), SyncError> {
    if !local.exists() {
        debug!("publish_verified: no local source for {remote}, nothing to do");
        return Ok(());
    }

    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match publish(store, local, remote) {
            Ok(()) => {}
            Err(SyncError::Transport(RemoteError::Interrupted { cmd })) => {
                return Err(SyncError::Transport(RemoteError::Interrupted { cmd }));
            }
            Err(e) => {
                warn!("attempt {attempt}: publish failed for {remote}: {e}");
                continue;
            }
        }
        match resolve_object_hash(store, remote)? {
            Some(found) if found == expected_hash => return Ok(()),
            Some(found) => {
                warn!(
                    "verification mismatch for {remote}: remote={} expected={}",
                    prefix(&found),
                    prefix(expected_hash)
                );
            }
            None => {
                warn!("attempt {attempt}: cannot resolve remote hash for {remote}");
            }
        }
        // the published object is wrong or unreadable; take it back down
        let _ = store.delete(remote);
    }

    Err(SyncError::Verification { remote_path: remote.to_owned(), attempts: max_attempts })
}

/// Hash of the remote object, by the cheapest mechanism available: native
/// hashsum over the exact path first, then a full read hashed locally.
/// `None` when the object cannot be read at all.
fn resolve_object_hash(
    store: &dyn RemoteStore,
    remote: &str,
) -> Result<Option<String>, SyncError> {
    let anchored = format!("/{}", remote.trim_start_matches('/'));
    if let Some(map) = store.hashsum(&anchored)? {
        if let Some(found) = map.get(remote) {
            return Ok(Some(found.clone()));
        }
    }
    match store.cat(remote)? {
        Some(bytes) => Ok(Some(hash::sha256_hex(&bytes))),
        None => Ok(None),
    }
}

fn prefix(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}
