//! Wimforge - offline Windows image customization pipeline.
//!
//! Builds recurring "golden images": injects updates, drivers, language
//! resources, provisioning data, and branding into a base WIM, then
//! re-packages it for distribution.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wimforge::commands;
use wimforge::winver::OsFamily;

#[derive(Parser)]
#[command(name = "wimforge")]
#[command(about = "Offline Windows image customization pipeline")]
#[command(
    after_help = "QUICK START:\n  wimforge preflight                 Check host tools\n  wimforge run -s selections.json    Build a golden image\n  wimforge resolve w11 23H2          List current updates\n  wimforge clean                     Remove staging trees"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline from a selections snapshot
    Run {
        /// Selections snapshot (JSON)
        #[arg(short, long)]
        selections: PathBuf,
        /// Log file path (default: logs/run-<timestamp>.log)
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Write a starter selections snapshot to edit by hand
    Init {
        /// Where to write the snapshot
        path: PathBuf,
        /// Source image path recorded in the snapshot
        #[arg(long, default_value = "imports/install.wim")]
        source: PathBuf,
        /// Image index to customize
        #[arg(long, default_value = "1")]
        index: u32,
        /// Output directory for the exported image
        #[arg(long, default_value = "out")]
        output: PathBuf,
    },

    /// Resolve current updates for a target, optionally downloading them
    Resolve {
        /// OS family (w10 or w11)
        family: OsFamily,
        /// Marketing version (e.g. 22H2)
        version: String,
        /// Target architecture
        #[arg(long, default_value = "x64")]
        arch: String,
        /// Include unclassified (optional) updates
        #[arg(long)]
        optional: bool,
        /// Include dynamic/Safe OS updates
        #[arg(long)]
        dynamic: bool,
        /// Prune superseded artifacts before resolving
        #[arg(long)]
        prune_first: bool,
        /// Download resolved artifacts into the repository
        #[arg(long)]
        download: bool,
    },

    /// Remove superseded artifacts from the update repository
    Prune {
        /// OS family (w10 or w11)
        family: OsFamily,
        /// Marketing version (e.g. 22H2)
        version: String,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run preflight checks (verify host tools and directories)
    Preflight {
        /// Fail if any required checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Clean scratch state (default: staging only, repository preserved)
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show resolved configuration
    Config,
    /// Show a selections snapshot
    Selections {
        /// Snapshot path
        path: PathBuf,
    },
    /// Show stored artifacts for a target
    Repo {
        /// OS family (w10 or w11)
        family: OsFamily,
        /// Marketing version (e.g. 22H2)
        version: String,
    },
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Clean staging trees only
    Staging,
    /// Clean run logs only
    Logs,
    /// Clean the update repository
    Repo,
    /// Clean staging, logs, and the update repository
    All,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = std::env::current_dir().context("Could not determine working directory")?;

    // Load .env if present
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Run { selections, log } => {
            commands::cmd_run(&base_dir, &selections, log)?;
        }

        Commands::Init {
            path,
            source,
            index,
            output,
        } => {
            commands::cmd_init(&path, source, index, output)?;
        }

        Commands::Resolve {
            family,
            version,
            arch,
            optional,
            dynamic,
            prune_first,
            download,
        } => {
            commands::cmd_resolve(
                &base_dir,
                commands::resolve::ResolveOptions {
                    family,
                    version,
                    architecture: arch,
                    include_optional: optional,
                    include_dynamic: dynamic,
                    prune_first,
                    download,
                },
            )?;
        }

        Commands::Prune { family, version } => {
            commands::cmd_prune(&base_dir, family, &version)?;
        }

        Commands::Show { what } => {
            let target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Selections { path } => commands::show::ShowTarget::Selections { path },
                ShowTarget::Repo { family, version } => {
                    commands::show::ShowTarget::Repo { family, version }
                }
            };
            commands::cmd_show(&base_dir, target)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&base_dir, strict)?;
        }

        Commands::Clean { what } => {
            let target = match what {
                None | Some(CleanTarget::Staging) => commands::clean::CleanTarget::Staging,
                Some(CleanTarget::Logs) => commands::clean::CleanTarget::Logs,
                Some(CleanTarget::Repo) => commands::clean::CleanTarget::Repo,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(&base_dir, target)?;
        }
    }

    Ok(())
}
