//! The directory-backed store: the [`RemoteStore`] contract over a plain
//! local tree. Used for directory targets and throughout the tests, where
//! it stands in for a real remote without subprocesses.
//!
//! Filter globs support the subset the stages use: `*` (within one path
//! segment), `**` (across segments), `?`, and everything else literal. As
//! with rclone filters, a pattern without a leading `/` matches at any
//! depth.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::RemoteError;
use crate::store::RemoteStore;

pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open the backing directory, creating it if needed.
    pub fn create(root: PathBuf) -> Result<DirStore, RemoteError> {
        fs::create_dir_all(&root).map_err(|e| RemoteError::io(&root, e))?;
        Ok(DirStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full(&self, rel: &str) -> PathBuf {
        self.root.join(rel.trim_start_matches('/'))
    }

    /// All file paths under `base`, relative, `/`-separated, sorted.
    fn walk_relative(&self, base: &Path) -> Result<Vec<String>, RemoteError> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(base) {
            let entry = entry.map_err(|e| RemoteError::Parse {
                what: format!("directory walk under {}", base.display()),
                detail: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(base)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            paths.push(rel);
        }
        paths.sort();
        Ok(paths)
    }
}

/// rclone-style filter glob to an anchored regex over relative paths.
fn glob_to_regex(glob: &str) -> Result<Regex, RemoteError> {
    let (anchored, body) = match glob.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, glob),
    };
    let mut pattern = String::from("^");
    if !anchored {
        pattern.push_str(r"(?:.*/)?");
    }
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    pattern.push_str(".*");
                } else {
                    pattern.push_str("[^/]*");
                }
            }
            '?' => pattern.push_str("[^/]"),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| RemoteError::Parse {
        what: format!("filter glob '{glob}'"),
        detail: e.to_string(),
    })
}

fn sha256_file(path: &Path) -> Result<String, RemoteError> {
    let bytes = fs::read(path).map_err(|e| RemoteError::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn copy_into(src: &Path, dest: &Path) -> Result<(), RemoteError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| RemoteError::io(parent, e))?;
    }
    fs::copy(src, dest).map_err(|e| RemoteError::io(src, e))?;
    Ok(())
}

impl RemoteStore for DirStore {
    fn target(&self) -> String {
        self.root.display().to_string()
    }

    fn copy_to(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        copy_into(local, &self.full(remote))
    }

    fn fetch(&self, remote: &str, local: &Path) -> Result<bool, RemoteError> {
        let src = self.full(remote);
        if !src.is_file() {
            return Ok(false);
        }
        copy_into(&src, local)?;
        Ok(true)
    }

    fn move_to(&self, src: &str, dst: &str) -> Result<(), RemoteError> {
        let from = self.full(src);
        let to = self.full(dst);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| RemoteError::io(parent, e))?;
        }
        match fs::rename(&from, &to) {
            Ok(()) => Ok(()),
            Err(_) => {
                // cross-device fallback
                fs::copy(&from, &to).map_err(|e| RemoteError::io(&from, e))?;
                fs::remove_file(&from).map_err(|e| RemoteError::io(&from, e))?;
                Ok(())
            }
        }
    }

    fn cat(&self, remote: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let path = self.full(remote);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RemoteError::io(&path, e)),
        }
    }

    fn hashsum(&self, glob: &str) -> Result<Option<BTreeMap<String, String>>, RemoteError> {
        let matcher = glob_to_regex(glob)?;
        let mut map = BTreeMap::new();
        for rel in self.walk_relative(&self.root)? {
            if matcher.is_match(&rel) {
                map.insert(rel.clone(), sha256_file(&self.full(&rel))?);
            }
        }
        Ok(Some(map))
    }

    fn list(&self, glob: &str) -> Result<Vec<String>, RemoteError> {
        let matcher = glob_to_regex(glob)?;
        let paths = self
            .walk_relative(&self.root)?
            .into_iter()
            .filter(|rel| matcher.is_match(rel))
            .collect();
        Ok(paths)
    }

    fn delete(&self, remote: &str) -> Result<(), RemoteError> {
        let path = self.full(remote);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RemoteError::io(&path, e)),
        }
    }

    fn exists(&self, remote: &str) -> Result<bool, RemoteError> {
        Ok(self.full(remote).exists())
    }

    fn fetch_tree(
        &self,
        prefix: &str,
        local: &Path,
        exclude: Option<&str>,
    ) -> Result<bool, RemoteError> {
        let base = self.full(prefix);
        if !base.is_dir() {
            debug!("fetch_tree: remote prefix '{prefix}' not found");
            return Ok(false);
        }
        fs::create_dir_all(local).map_err(|e| RemoteError::io(local, e))?;
        let skip = exclude.map(glob_to_regex).transpose()?;
        for rel in self.walk_relative(&base)? {
            if skip.as_ref().is_some_and(|m| m.is_match(&rel)) {
                continue;
            }
            copy_into(&base.join(&rel), &local.join(&rel))?;
        }
        Ok(true)
    }

    fn push_tree(
        &self,
        local: &Path,
        prefix: &str,
        include: Option<&str>,
    ) -> Result<(), RemoteError> {
        if !local.is_dir() {
            let missing = std::io::Error::new(ErrorKind::NotFound, "source directory not found");
            return Err(RemoteError::io(local, missing));
        }
        let keep = include.map(glob_to_regex).transpose()?;
        let dest_base = self.full(prefix);
        for rel in self.walk_relative(local)? {
            if keep.as_ref().is_some_and(|m| !m.is_match(&rel)) {
                continue;
            }
            copy_into(&local.join(&rel), &dest_base.join(&rel))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("*", "manifest.csv", true)]
    #[case("*", "2024/a/message.eml", true)]
    #[case("**/message.eml", "2024/a/message.eml", true)]
    #[case("**/message.eml", "2024/a/metadata.json", false)]
    #[case("**/message.eml", "deep/er/tree/message.eml", true)]
    #[case("manifest.csv.*.tmp", "manifest.csv.ab12.tmp", true)]
    #[case("manifest.csv.*.tmp", "manifest.csv", false)]
    #[case("manifest.csv.*.tmp", "2024/manifest.csv.ab12.tmp", true)]
    #[case("_archives/**", "_archives/messages_2020.tar.zst", true)]
    #[case("_archives/**", "2020/a/message.eml", false)]
    #[case("messages_2020.tar.zst", "_archives/messages_2020.tar.zst", true)]
    #[case("/top.txt", "top.txt", true)]
    #[case("/top.txt", "nested/top.txt", false)]
    #[case("file?.bin", "file1.bin", true)]
    #[case("file?.bin", "file12.bin", false)]
    fn glob_matching(#[case] glob: &str, #[case] path: &str, #[case] matches: bool) {
        let re = glob_to_regex(glob).expect("glob");
        assert_eq!(re.is_match(path), matches, "glob {glob} vs {path}");
    }
}
