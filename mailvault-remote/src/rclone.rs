//! The rclone-backed store: every operation spawns the configured binary.
//!
//! rclone's exit codes 3 ("directory not found") and 4 ("file not found")
//! are the negative result, not an error. A child killed by a signal, for
//! example a Ctrl-C that reached the whole process group, surfaces as
//! [`RemoteError::Interrupted`] from the exec layer.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Output;

use mailvault_core::config::RemoteSettings;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::exec;
use crate::store::RemoteStore;

const EXIT_DIR_NOT_FOUND: i32 = 3;
const EXIT_FILE_NOT_FOUND: i32 = 4;

fn is_not_found(output: &Output) -> bool {
    matches!(output.status.code(), Some(EXIT_DIR_NOT_FOUND) | Some(EXIT_FILE_NOT_FOUND))
}

pub struct RcloneStore {
    target: String,
    binary: String,
    base_args: Vec<String>,
}

impl RcloneStore {
    pub fn from_settings(settings: &RemoteSettings) -> RcloneStore {
        RcloneStore {
            target: settings.target.trim_end_matches('/').to_owned(),
            binary: settings.rclone_binary.clone(),
            base_args: vec![
                format!("--log-level={}", settings.rclone_log_level),
                format!("--transfers={}", settings.transfers),
                format!("--multi-thread-streams={}", settings.multi_thread_streams),
            ],
        }
    }

    fn args(&self, parts: Vec<String>) -> Vec<String> {
        let mut all = self.base_args.clone();
        all.extend(parts);
        all
    }

    fn run(&self, parts: Vec<String>) -> Result<(Output, String), RemoteError> {
        let args = self.args(parts);
        let cmd = exec::render(&self.binary, &args);
        let output = exec::run(&self.binary, &args)?;
        Ok((output, cmd))
    }

    fn run_checked(&self, parts: Vec<String>) -> Result<Output, RemoteError> {
        exec::run_checked(&self.binary, &self.args(parts))
    }

    fn full(&self, rel: &str) -> String {
        if rel.is_empty() {
            self.target.clone()
        } else {
            format!("{}/{}", self.target, rel.trim_start_matches('/'))
        }
    }
}

fn failed(cmd: String, output: &Output) -> RemoteError {
    RemoteError::CommandFailed {
        cmd,
        code: output.status.code().unwrap_or(-1),
        stderr: exec::snippet(&output.stderr),
    }
}

/// `rclone hashsum SHA256` prints `<hex>  <path>` per object; the path may
/// itself contain spaces, so split once on the first whitespace run.
fn parse_hashsum(stdout: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in stdout.lines() {
        let line = line.trim();
        let mut parts = line.splitn(2, char::is_whitespace);
        if let (Some(hash), Some(path)) = (parts.next(), parts.next()) {
            let path = path.trim();
            if !hash.is_empty() && !path.is_empty() {
                map.insert(path.to_owned(), hash.to_owned());
            }
        }
    }
    map
}

#[derive(Deserialize)]
struct LsJsonEntry {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "IsDir", default)]
    is_dir: bool,
}

fn parse_lsjson(stdout: &[u8]) -> Result<Vec<String>, RemoteError> {
    let entries: Vec<LsJsonEntry> =
        serde_json::from_slice(stdout).map_err(|e| RemoteError::Parse {
            what: "lsjson output".to_owned(),
            detail: e.to_string(),
        })?;
    Ok(entries.into_iter().filter(|e| !e.is_dir).map(|e| e.path).collect())
}

impl RemoteStore for RcloneStore {
    fn target(&self) -> String {
        self.target.clone()
    }

    fn copy_to(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let local = local.to_string_lossy().into_owned();
        self.run_checked(vec!["copyto".into(), local, self.full(remote)])?;
        Ok(())
    }

    fn fetch(&self, remote: &str, local: &Path) -> Result<bool, RemoteError> {
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RemoteError::io(parent, e))?;
        }
        let local = local.to_string_lossy().into_owned();
        let (output, cmd) = self.run(vec!["copyto".into(), self.full(remote), local])?;
        if output.status.success() {
            Ok(true)
        } else if is_not_found(&output) {
            Ok(false)
        } else {
            Err(failed(cmd, &output))
        }
    }

    fn move_to(&self, src: &str, dst: &str) -> Result<(), RemoteError> {
        self.run_checked(vec!["moveto".into(), self.full(src), self.full(dst)])?;
        Ok(())
    }

    fn cat(&self, remote: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let (output, cmd) = self.run(vec!["cat".into(), self.full(remote)])?;
        if output.status.success() {
            Ok(Some(output.stdout))
        } else if is_not_found(&output) {
            Ok(None)
        } else {
            Err(failed(cmd, &output))
        }
    }

    fn hashsum(&self, glob: &str) -> Result<Option<BTreeMap<String, String>>, RemoteError> {
        let (output, _) = self.run(vec![
            "hashsum".into(),
            "SHA256".into(),
            self.target.clone(),
            "--include".into(),
            glob.to_owned(),
            "--recursive".into(),
        ])?;
        if output.status.success() {
            Ok(Some(parse_hashsum(&String::from_utf8_lossy(&output.stdout))))
        } else {
            warn!("remote does not support hashsum SHA256 (exit {:?})", output.status.code());
            Ok(None)
        }
    }

    fn list(&self, glob: &str) -> Result<Vec<String>, RemoteError> {
        let (output, cmd) = self.run(vec![
            "lsjson".into(),
            self.target.clone(),
            "--include".into(),
            glob.to_owned(),
            "--recursive".into(),
        ])?;
        if output.status.success() {
            parse_lsjson(&output.stdout)
        } else if is_not_found(&output) {
            Ok(Vec::new())
        } else {
            Err(failed(cmd, &output))
        }
    }

    fn delete(&self, remote: &str) -> Result<(), RemoteError> {
        let (output, cmd) = self.run(vec!["deletefile".into(), self.full(remote)])?;
        if output.status.success() || is_not_found(&output) {
            Ok(())
        } else {
            Err(failed(cmd, &output))
        }
    }

    fn exists(&self, remote: &str) -> Result<bool, RemoteError> {
        let (output, cmd) = self.run(vec!["lsf".into(), self.full(remote)])?;
        if output.status.success() {
            Ok(!output.stdout.is_empty())
        } else if is_not_found(&output) {
            Ok(false)
        } else {
            Err(failed(cmd, &output))
        }
    }

    fn fetch_tree(
        &self,
        prefix: &str,
        local: &Path,
        exclude: Option<&str>,
    ) -> Result<bool, RemoteError> {
        std::fs::create_dir_all(local).map_err(|e| RemoteError::io(local, e))?;
        let mut parts = vec![
            "copy".into(),
            self.full(prefix),
            local.to_string_lossy().into_owned(),
        ];
        if let Some(pattern) = exclude {
            parts.push("--exclude".into());
            parts.push(pattern.to_owned());
        }
        let (output, cmd) = self.run(parts)?;
        if output.status.success() {
            Ok(true)
        } else if is_not_found(&output) {
            debug!("fetch_tree: remote prefix '{prefix}' not found");
            Ok(false)
        } else {
            Err(failed(cmd, &output))
        }
    }

    fn push_tree(
        &self,
        local: &Path,
        prefix: &str,
        include: Option<&str>,
    ) -> Result<(), RemoteError> {
        let mut parts = vec![
            "copy".into(),
            local.to_string_lossy().into_owned(),
            self.full(prefix),
        ];
        if let Some(pattern) = include {
            parts.push("--include".into());
            parts.push(pattern.to_owned());
        }
        self.run_checked(parts)?;
        Ok(())
    }
}
