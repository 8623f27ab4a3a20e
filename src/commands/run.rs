//! Run command - the unattended pipeline entry point.
//!
//! Loads a selections snapshot, wires up the production collaborators,
//! and drives the pipeline to a terminal state. The process exit status
//! is the success/failure signal; the details live in the written log.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::catalog::{CatalogSource, CommunityCatalog, ManagementCatalog};
use crate::config::{CatalogBackend, Config};
use crate::logging::RunLog;
use crate::pipeline::{Pipeline, RunOutcome, StdinPrompter};
use crate::selections::Selections;
use crate::servicing::DismServicing;

/// Build the configured catalog backend.
pub(crate) fn build_catalog(config: &Config) -> Result<Box<dyn CatalogSource>> {
    match config.catalog_backend {
        CatalogBackend::Community => Ok(Box::new(CommunityCatalog::new(&config.catalog_url)?)),
        CatalogBackend::Management => {
            let export = config
                .management_export
                .as_ref()
                .context("WIMFORGE_MANAGEMENT_EXPORT must be set for the management catalog")?;
            Ok(Box::new(ManagementCatalog::new(export)))
        }
    }
}

fn default_log_path(config: &Config) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    config.log_dir.join(format!("run-{stamp}.log"))
}

/// Execute the run command.
pub fn cmd_run(base_dir: &Path, selections_path: &Path, log_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(base_dir);
    let selections = Selections::load(selections_path)?;

    let log_path = log_path.unwrap_or_else(|| default_log_path(&config));
    let mut log = RunLog::to_file(&log_path)?;

    let servicing = DismServicing::new(&config.dism_tool);
    let catalog = build_catalog(&config)?;
    let prompter = StdinPrompter;

    let outcome = Pipeline {
        config: &config,
        selections: &selections,
        servicing: &servicing,
        catalog: catalog.as_ref(),
        prompter: &prompter,
        log: &mut log,
    }
    .run();

    match outcome {
        RunOutcome::Completed => {
            println!("\nRun completed. Log: {}", log_path.display());
            Ok(())
        }
        RunOutcome::Discarded { reason } => {
            bail!("Run discarded: {reason}\nLog: {}", log_path.display())
        }
        RunOutcome::Aborted { reason } => {
            bail!("Run aborted: {reason}\nLog: {}", log_path.display())
        }
    }
}
