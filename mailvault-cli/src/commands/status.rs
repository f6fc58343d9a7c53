//! `mailvault status` — catalog counts and manifest queue depth.
//!
//! Reads only local state: the catalog database and the on-disk manifest
//! queue snapshot. The remote is never contacted.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use mailvault_catalog::{Catalog, CatalogSummary};
use mailvault_core::config::Settings;
use mailvault_sync::ManifestSync;

/// Arguments for `mailvault status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusJson {
    target: String,
    state_dir: String,
    counts: CatalogSummary,
    manifest_queue: usize,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "category")]
    category: &'static str,
    #[tabled(rename = "count")]
    count: u64,
}

pub fn run(args: StatusArgs, config: Option<&Path>) -> Result<()> {
    let settings = Settings::load(config).context("could not load settings")?;
    let layout = settings.layout().context("could not resolve the state directory")?;

    let catalog = Catalog::open(&layout.db)
        .with_context(|| format!("could not open the catalog at {}", layout.db.display()))?;
    let counts = catalog.summary().context("could not read catalog counts")?;
    let queued = ManifestSync::new(&layout, &settings.manifest).pending_on_disk();

    if args.json {
        let payload = StatusJson {
            target: settings.remote.target.clone(),
            state_dir: layout.state_dir.display().to_string(),
            counts,
            manifest_queue: queued,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("could not serialize status")?
        );
        return Ok(());
    }

    print_table(&settings, &counts, queued);
    Ok(())
}

fn print_table(settings: &Settings, counts: &CatalogSummary, queued: usize) {
    println!(
        "mailvault v{} | target {} | {} messages tracked",
        env!("CARGO_PKG_VERSION"),
        settings.remote.target,
        counts.total,
    );

    let rows = vec![
        StatusRow { category: "pending upload", count: counts.pending },
        StatusRow { category: "synced", count: counts.synced },
        StatusRow { category: "archived", count: counts.archived },
        StatusRow { category: "spam (kept local)", count: counts.spam },
        StatusRow { category: "manifest queue", count: queued as u64 },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if counts.pending > 0 {
        println!(
            "{} {} message(s) pending — run 'mailvault backup' to publish them.",
            "■".yellow().bold(),
            counts.pending,
        );
    }
    if queued > 0 {
        println!(
            "{} {} manifest entr{} queued — the next backup or archive run uploads them.",
            "■".yellow().bold(),
            queued,
            if queued == 1 { "y" } else { "ies" },
        );
    }
    if counts.pending == 0 && queued == 0 {
        println!("{} everything recorded is published.", "■".green().bold());
    }
}
