//! sha256 helpers shared by the stages.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn sha256_file(path: &Path) -> Result<String, SyncError> {
    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    Ok(sha256_hex(&bytes))
}
