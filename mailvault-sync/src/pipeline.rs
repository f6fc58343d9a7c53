//! Stage orchestration: fetch → backup → rotate → audit.
//!
//! One [`StageContext`] carries everything the stages share; `main` builds
//! it once and hands out nothing else. The pipeline always starts with
//! manifest recovery and always ends by persisting whatever is left in the
//! manifest queue, on success and on every error path alike, so a crash or
//! interrupt can drop at most work the next run will redo, never recorded
//! state.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use mailvault_catalog::Catalog;
use mailvault_core::config::{Settings, StateLayout};
use mailvault_engine::{InterruptHub, Stats};
use mailvault_remote::{exec, RemoteError, RemoteStore};

use crate::audit::{self, AuditOutcome};
use crate::error::SyncError;
use crate::manifest::ManifestSync;
use crate::rotation;
use crate::uploader;

/// Which stages a run executes, in fixed order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub fetch: bool,
    pub backup: bool,
    pub rotate: bool,
    pub audit: bool,
}

impl Plan {
    /// Everything: fetch, backup, rotate, audit.
    pub fn full() -> Plan {
        Plan { fetch: true, backup: true, rotate: true, audit: true }
    }
}

/// Shared state for one pipeline run.
pub struct StageContext {
    pub settings: Settings,
    pub layout: StateLayout,
    pub catalog: Arc<Catalog>,
    pub store: Arc<dyn RemoteStore>,
    pub manifest: Arc<ManifestSync>,
    pub stats: Arc<Stats>,
    pub hub: Arc<InterruptHub>,
}

/// Run the planned stages. Stage order is fixed; a failing stage stops the
/// run and later stages do not execute.
pub fn run_plan(ctx: &StageContext, plan: &Plan, repair: bool) -> Result<(), SyncError> {
    info!("=== mailvault pipeline started ===");
    let started = Instant::now();
    let result = run_stages(ctx, plan, repair);
    // queued entries survive any outcome
    ctx.manifest.persist_queue();
    info!("=== mailvault pipeline finished in {:.1}s ===", started.elapsed().as_secs_f64());
    result
}

fn run_stages(ctx: &StageContext, plan: &Plan, repair: bool) -> Result<(), SyncError> {
    ctx.manifest.recover(ctx.store.as_ref())?;

    if plan.fetch {
        run_fetch(&ctx.settings.fetch.command)?;
    }
    if plan.backup {
        uploader::run_backup(ctx)?;
    }
    if plan.rotate {
        rotation::run_rotate(ctx)?;
    }
    if plan.audit {
        if let AuditOutcome::Unverifiable = audit::run_audit(ctx, repair)? {
            warn!("store left unverified, see audit log above");
        }
    }
    Ok(())
}

/// Run the configured mail-fetch command, streaming its output into the
/// log. A non-zero exit is fatal for the whole run: backing up a store the
/// fetcher left half-written would record garbage.
fn run_fetch(command: &str) -> Result<(), SyncError> {
    let argv = shlex::split(command).filter(|argv| !argv.is_empty()).ok_or_else(|| {
        SyncError::Transport(RemoteError::Parse {
            what: "fetch command".to_owned(),
            detail: format!("cannot parse {command:?}"),
        })
    })?;

    let status = exec::run_streaming("fetch", &argv[0], &argv[1..])?;
    if !status.success() {
        return Err(SyncError::Transport(RemoteError::CommandFailed {
            cmd: command.to_owned(),
            code: status.code().unwrap_or(-1),
            stderr: "see log output".to_owned(),
        }));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
