//! Shared startup path for the stage subcommands.
//!
//! Every stage subcommand goes through the same sequence: load settings,
//! rotate and open the log, open the catalog and the remote store, wire the
//! interrupt hub to SIGINT/SIGTERM, then hand a [`StageContext`] to
//! `run_plan`. Only the [`Plan`] differs between subcommands.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use mailvault_catalog::Catalog;
use mailvault_core::config::Settings;
use mailvault_engine::{InterruptHub, Stats, StatusReporter};
use mailvault_sync::{run_plan, ManifestSync, Plan, StageContext, SyncError};

use crate::logging;

/// Run `plan` against the configured state and remote. `repair_override`
/// forces the audit repair switch regardless of the settings file.
pub fn execute(config: Option<&Path>, plan: Plan, repair_override: Option<bool>) -> Result<()> {
    let settings = Settings::load(config).context("could not load settings")?;
    let layout = settings.layout().context("could not resolve the state directory")?;
    for dir in [&layout.state_dir, &layout.staging] {
        fs::create_dir_all(dir)
            .with_context(|| format!("could not create {}", dir.display()))?;
    }

    logging::init(&layout.log, &settings.logging);

    let catalog = Catalog::open(&layout.db)
        .with_context(|| format!("could not open the catalog at {}", layout.db.display()))?;

    let store = mailvault_remote::open(&settings.remote)
        .context("could not build the remote store")?;
    info!("remote target: {}", store.target());

    let hub = Arc::new(InterruptHub::new());
    let manifest = Arc::new(ManifestSync::new(&layout, &settings.manifest));

    let signal_hub = Arc::clone(&hub);
    let signal_manifest = Arc::clone(&manifest);
    ctrlc::set_handler(move || {
        warn!("interrupt received, asking workers to stop");
        signal_hub.interrupt_all();
        signal_manifest.persist_queue();
    })
    .context("could not install the signal handler")?;

    let stats = Arc::new(Stats::new());
    let reporter = match settings.status.interval_secs {
        0 => None,
        secs => Some(StatusReporter::start(Arc::clone(&stats), Duration::from_secs(secs))),
    };

    let repair = repair_override.unwrap_or(settings.audit.repair);
    let ctx = StageContext {
        settings,
        layout,
        catalog: Arc::new(catalog),
        store: Arc::from(store),
        manifest,
        stats: Arc::clone(&stats),
        hub,
    };

    let outcome = run_plan(&ctx, &plan, repair);
    if let Some(reporter) = reporter {
        reporter.stop();
    }

    match outcome {
        Ok(()) => {
            println!("{}", stats.summary_line());
            Ok(())
        }
        Err(err @ SyncError::Interrupted) => {
            error!("run interrupted; queued manifest entries were saved");
            Err(err).context("run interrupted")
        }
        Err(err) => Err(err).context("run failed"),
    }
}
