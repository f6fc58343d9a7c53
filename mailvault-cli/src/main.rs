//! mailvault — incremental mail backup to an rclone remote.
//!
//! # Usage
//!
//! ```text
//! mailvault fetch                  # run the configured mail fetch command
//! mailvault backup                 # publish pending messages
//! mailvault archive                # fold expired years into tar.zst archives
//! mailvault check [--no-repair]    # verify the remote against the catalog
//! mailvault run                    # backup + archive + check
//! mailvault full                   # fetch + backup + archive + check
//! mailvault status [--json]        # catalog counts and manifest queue depth
//! ```
//!
//! `--config <path>` works on every subcommand; without it the settings are
//! probed from `./mailvault.yaml`, then `~/.config/mailvault/config.yaml`.

mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::status::StatusArgs;
use mailvault_catalog::CatalogError;
use mailvault_sync::Plan;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "mailvault",
    version,
    about = "Incremental, verified mail backup to an rclone remote",
    long_about = None,
)]
struct Cli {
    /// Settings file to use instead of the default probe order.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the configured mail fetch command (mbsync, offlineimap, ...).
    Fetch,

    /// Publish pending messages to the remote store.
    Backup,

    /// Fold years past the retention window into per-year archives.
    Archive,

    /// Verify the remote store against the catalog.
    Check {
        /// Report divergent messages without republishing them.
        #[arg(long)]
        no_repair: bool,
    },

    /// Backup, then archive, then check.
    Run,

    /// Fetch new mail first, then backup, archive and check.
    Full,

    /// Show catalog counts and the manifest queue depth.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            // An unopenable catalog is an environment problem, not a run
            // failure; callers distinguish it by exit code.
            if err.downcast_ref::<CatalogError>().is_some() {
                return ExitCode::from(2);
            }
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Fetch => {
            commands::pipeline::execute(config, Plan { fetch: true, ..Plan::default() }, None)
        }
        Commands::Backup => {
            commands::pipeline::execute(config, Plan { backup: true, ..Plan::default() }, None)
        }
        Commands::Archive => {
            commands::pipeline::execute(config, Plan { rotate: true, ..Plan::default() }, None)
        }
        Commands::Check { no_repair } => commands::pipeline::execute(
            config,
            Plan { audit: true, ..Plan::default() },
            no_repair.then_some(false),
        ),
        Commands::Run => commands::pipeline::execute(
            config,
            Plan { backup: true, rotate: true, audit: true, ..Plan::default() },
            None,
        ),
        Commands::Full => commands::pipeline::execute(config, Plan::full(), None),
        Commands::Status(args) => commands::status::run(args, config),
    }
}
