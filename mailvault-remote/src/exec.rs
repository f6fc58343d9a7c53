//! Subprocess plumbing shared by the rclone backend and the fetch stage.
//!
//! Two shapes:
//! - [`run`] captures stdout/stderr and hands the exit status back to the
//!   caller, which decides what a non-zero code means.
//! - [`run_streaming`] forwards the child's output line by line to the log,
//!   for long-running interactive-style commands (mbsync, tar).
//!
//! Killed-by-signal is always surfaced as [`RemoteError::Interrupted`] so a
//! Ctrl-C pressed while a child runs propagates as a typed error instead of
//! a bogus failure.

use std::io::{BufRead, BufReader};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::error::RemoteError;

const STDERR_SNIPPET: usize = 400;

pub fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_owned()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

pub(crate) fn snippet(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.len() > STDERR_SNIPPET {
        // keep a char boundary when cutting
        let mut end = STDERR_SNIPPET;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    } else {
        text.to_owned()
    }
}

/// Run to completion, capturing output. Any normal exit is `Ok`; the caller
/// inspects `status.code()` (rclone uses specific codes for "not found").
pub fn run(program: &str, args: &[String]) -> Result<Output, RemoteError> {
    let cmd = render(program, args);
    debug!("run command: {cmd}");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| RemoteError::Spawn { cmd: cmd.clone(), source: e })?;
    if output.status.code().is_none() {
        error!("command interrupted: {cmd}");
        return Err(RemoteError::Interrupted { cmd });
    }
    debug!("command exited {:?}: {cmd}", output.status.code());
    Ok(output)
}

/// `run` plus the non-zero-is-an-error policy, with stderr context.
pub fn run_checked(program: &str, args: &[String]) -> Result<Output, RemoteError> {
    let output = run(program, args)?;
    if output.status.success() {
        Ok(output)
    } else {
        let cmd = render(program, args);
        let stderr = snippet(&output.stderr);
        error!("command failed: {cmd}: {stderr}");
        Err(RemoteError::CommandFailed {
            cmd,
            code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }
}

/// Run a child forwarding each output line to the log as `[label] line`.
/// Returns the exit status; non-zero is logged here and judged by the
/// caller.
pub fn run_streaming(
    label: &str,
    program: &str,
    args: &[String],
) -> Result<std::process::ExitStatus, RemoteError> {
    let cmd = render(program, args);
    info!("starting step: {label}");
    debug!("command: {cmd}");
    let start = Instant::now();

    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| RemoteError::Spawn { cmd: cmd.clone(), source: e })?;

    let stderr_reader = child.stderr.take().map(|stderr| {
        let label = label.to_owned();
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                let line = line.trim_end();
                if !line.is_empty() {
                    info!("[{label}] {line}");
                }
            }
        })
    });
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            let line = line.trim_end();
            if !line.is_empty() {
                info!("[{label}] {line}");
            }
        }
    }
    if let Some(handle) = stderr_reader {
        let _ = handle.join();
    }

    let status = child.wait().map_err(|e| RemoteError::Spawn { cmd: cmd.clone(), source: e })?;
    let elapsed = start.elapsed().as_secs_f64();
    match status.code() {
        None => {
            error!("interrupt for stream {label}");
            Err(RemoteError::Interrupted { cmd })
        }
        Some(0) => {
            info!("finished {label} in {elapsed:.1}s");
            Ok(status)
        }
        Some(code) => {
            error!("{label} failed with exit code {code} after {elapsed:.1}s");
            Ok(status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn run_captures_stdout() {
        let out = run("echo", &args(&["hello"])).expect("run echo");
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }

    #[test]
    fn run_reports_missing_binary_as_spawn_error() {
        let err = run("definitely-not-a-real-binary-xyz", &args(&[])).unwrap_err();
        assert!(matches!(err, RemoteError::Spawn { .. }), "got: {err}");
    }

    #[test]
    fn run_checked_surfaces_nonzero_exit() {
        let err = run_checked("false", &args(&[])).unwrap_err();
        match err {
            RemoteError::CommandFailed { code, .. } => assert_eq!(code, 1),
            other => panic!("expected CommandFailed, got {other}"),
        }
    }

    #[test]
    fn run_streaming_reports_exit_status() {
        assert!(run_streaming("T", "true", &args(&[])).expect("stream true").success());
        assert!(!run_streaming("T", "false", &args(&[])).expect("stream false").success());
    }

    #[test]
    fn render_joins_program_and_args() {
        assert_eq!(render("rclone", &args(&["lsf", "x:y"])), "rclone lsf x:y");
        assert_eq!(render("rclone", &[]), "rclone");
    }
}
