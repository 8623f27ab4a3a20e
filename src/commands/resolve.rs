//! Resolve command - repository maintenance outside a pipeline run.
//!
//! Queries the catalog for the current update set of one target and
//! optionally downloads it, so the repository can be kept warm between
//! golden-image builds.

use anyhow::{Context, Result};
use std::path::Path;

use crate::catalog::{self, download};
use crate::config::Config;
use crate::logging::RunLog;
use crate::repo::UpdateRepository;
use crate::winver::OsFamily;

use super::run::build_catalog;

/// Options for the resolve command.
pub struct ResolveOptions {
    pub family: OsFamily,
    pub version: String,
    pub architecture: String,
    pub include_optional: bool,
    pub include_dynamic: bool,
    /// Run the pruner to completion before resolving.
    pub prune_first: bool,
    /// Download resolved artifacts instead of only listing them.
    pub download: bool,
}

/// Execute the resolve command.
pub fn cmd_resolve(base_dir: &Path, opts: ResolveOptions) -> Result<()> {
    let config = Config::load(base_dir);
    let catalog_source = build_catalog(&config)?;
    let repo = UpdateRepository::new(&config.update_repo);
    let mut log = RunLog::stdout_only();

    if opts.prune_first {
        println!("=== Pruning superseded artifacts ===");
        let removed = catalog::prune(
            &repo,
            catalog_source.as_ref(),
            opts.family,
            &opts.version,
            &mut log,
        )?;
        println!("Pruned {removed} artifact(s).\n");
    }

    println!(
        "=== Resolving updates for {} {} ({}) ===",
        opts.family, opts.version, opts.architecture
    );
    let artifacts = catalog::resolve(
        catalog_source.as_ref(),
        opts.family,
        &opts.version,
        &opts.architecture,
        opts.include_optional,
        opts.include_dynamic,
        &mut log,
    )?;

    if artifacts.is_empty() {
        println!("Catalog returned no current artifacts for this target.");
        return Ok(());
    }

    for artifact in &artifacts {
        println!(
            "  [{}] {} ({} file(s))",
            artifact.class.key(),
            artifact.title,
            artifact.files.len()
        );
    }

    if !opts.download {
        println!("\n{} artifact(s) resolved. Re-run with --download to fetch.", artifacts.len());
        return Ok(());
    }

    println!("\n=== Downloading ===");
    let client = reqwest::blocking::Client::builder()
        .build()
        .context("Could not build download client")?;
    let mut fetched = 0;
    let mut failed = 0;
    for artifact in &artifacts {
        match download::fetch_artifact(&client, artifact, &repo, &mut log) {
            Ok(summary) => fetched += summary.fetched,
            Err(err) => {
                // One artifact's network failure is terminal for it alone.
                log.warn(&format!("Download of {} failed", artifact.title), &err);
                failed += 1;
            }
        }
    }
    println!("\nDownloaded {fetched} file(s); {failed} artifact(s) failed.");
    Ok(())
}
